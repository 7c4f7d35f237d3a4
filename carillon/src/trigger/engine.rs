/*
 *  Copyright 2025 Carillon Contributors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Trigger Engine
//!
//! Routes inbound events to event-based tasks. For each event the engine
//! loads the active triggers of the matching type, evaluates their
//! conditions, applies the cooldown gate, and dispatches an execution per
//! winning trigger. Cooldown suppression is hard: a suppressed event is
//! dropped, never queued for later.
//!
//! The fire is claimed in the database *before* dispatch, so a concurrent
//! duplicate event loses the claim instead of double-firing. One trigger's
//! dispatch failure is logged and never stops evaluation of the rest.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::dal::DAL;
use crate::database::universal_types::UniversalTimestamp;
use crate::error::TriggerError;
use crate::executor::ExecutionRunner;
use crate::models::execution::{TaskExecution, TriggerSource};
use crate::trigger::event::AgentEvent;

/// What happened to one inbound event.
#[derive(Debug, Default)]
pub struct EventOutcome {
    /// Triggers that matched, passed the cooldown gate, and dispatched.
    pub fired: usize,
    /// Triggers that matched but were inside their cooldown window or lost
    /// the fire claim.
    pub suppressed: usize,
    /// Candidate triggers whose conditions did not match.
    pub unmatched: usize,
    /// Executions created by this event, in trigger order.
    pub executions: Vec<TaskExecution>,
}

/// Evaluates inbound events against stored triggers and dispatches matches.
pub struct TriggerEngine {
    dal: DAL,
    runner: Arc<ExecutionRunner>,
}

impl TriggerEngine {
    pub fn new(dal: DAL, runner: Arc<ExecutionRunner>) -> Self {
        Self { dal, runner }
    }

    /// Handles one inbound event.
    ///
    /// When the event names an agent, only that agent's triggers are
    /// considered. Returns an error only when the candidate triggers cannot
    /// be loaded; per-trigger dispatch failures are recorded in logs and the
    /// outcome counts.
    pub async fn handle_event(&self, event: &AgentEvent) -> Result<EventOutcome, TriggerError> {
        let candidates = self
            .dal
            .event_triggers()
            .get_active_for_type(event.trigger_type, event.agent_id)
            .await?;

        debug!(
            trigger_type = %event.trigger_type,
            candidates = candidates.len(),
            "Evaluating inbound event"
        );

        let mut outcome = EventOutcome::default();
        let now = Utc::now();

        for trigger in candidates {
            if !trigger.conditions.matches(event) {
                outcome.unmatched += 1;
                continue;
            }

            if let Some(next_allowed) = trigger.next_allowed_fire() {
                if now < next_allowed.0 {
                    debug!(
                        trigger_id = %trigger.id,
                        next_allowed = %next_allowed,
                        "Trigger matched but is cooling down, event dropped"
                    );
                    outcome.suppressed += 1;
                    continue;
                }
            }

            // Claim the fire before dispatching so a concurrent duplicate
            // event cannot fire the same trigger twice.
            let claimed = self
                .dal
                .event_triggers()
                .claim_fire(
                    trigger.id,
                    trigger.last_triggered_at,
                    UniversalTimestamp(now),
                )
                .await?;
            if !claimed {
                debug!(trigger_id = %trigger.id, "Lost fire claim to a concurrent event");
                outcome.suppressed += 1;
                continue;
            }

            match self
                .runner
                .dispatch(
                    trigger.task_id,
                    TriggerSource::Event,
                    Some(event.payload.clone()),
                )
                .await
            {
                Ok(execution) => {
                    outcome.fired += 1;
                    outcome.executions.push(execution);
                }
                Err(e) => {
                    warn!(
                        trigger_id = %trigger.id,
                        task_id = %trigger.task_id,
                        "Trigger fired but dispatch failed: {}",
                        e
                    );
                    outcome.fired += 1;
                }
            }
        }

        Ok(outcome)
    }
}
