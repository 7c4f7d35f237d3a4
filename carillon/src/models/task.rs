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

//! Agent Task Model
//!
//! This module defines the domain structures for agent tasks: units of
//! recurring or event-driven work owned by one agent and one requesting
//! principal. Tasks are either `scheduled` (driven by a recurrence expression
//! and the poll loop) or `event_based` (driven by the trigger engine).
//!
//! Validation of the data-model invariants lives here, next to the types it
//! protects; the DAL calls [`NewAgentTask::validate`] before any insert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::ValidationError;
use crate::trigger::event::TriggerType;

/// Classification of a task, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Runs on a recurrence expression evaluated by the poll loop.
    Scheduled,
    /// Runs when an inbound event matches one of the task's triggers.
    EventBased,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Scheduled => write!(f, "scheduled"),
            TaskKind::EventBased => write!(f, "event_based"),
        }
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(TaskKind::Scheduled),
            "event_based" => Ok(TaskKind::EventBased),
            other => Err(format!("Unknown task kind: {}", other)),
        }
    }
}

/// Lifecycle status of a task.
///
/// `Completed`, `Failed`, and `Cancelled` are terminal; the only reversible
/// transition is the active/paused toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Eligible for dispatch by the poll loop or trigger engine.
    Active,
    /// Temporarily excluded from dispatch; no other side effects.
    Paused,
    /// Reached its `max_executions` cap after a successful run.
    Completed,
    /// Exceeded the configured consecutive-failure limit.
    Failed,
    /// Explicitly cancelled; never dispatched again.
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transitions out of this status are valid.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the lifecycle state machine permits moving to `target`.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        match (self, target) {
            (TaskStatus::Active, TaskStatus::Paused) => true,
            (TaskStatus::Active, TaskStatus::Completed) => true,
            (TaskStatus::Active, TaskStatus::Failed) => true,
            (TaskStatus::Active, TaskStatus::Cancelled) => true,
            (TaskStatus::Paused, TaskStatus::Active) => true,
            (TaskStatus::Paused, TaskStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TaskStatus::Active),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("Unknown task status: {}", other)),
        }
    }
}

/// Represents an agent task record (domain type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    /// Unique identifier for the task
    pub id: UniversalUuid,
    /// The agent that executes this task
    pub agent_id: UniversalUuid,
    /// The principal that requested this task
    pub principal_id: UniversalUuid,
    /// Short human-facing label
    pub name: String,
    /// Whether the task is scheduled or event-based (immutable)
    pub kind: TaskKind,
    /// Free-text instructions handed to the agent invocation collaborator
    pub instructions: String,
    /// Tool identifiers the agent may use for this task
    pub allowed_tools: Vec<String>,
    /// Canonical five-field recurrence expression (scheduled tasks only)
    pub cron_expression: Option<String>,
    /// IANA timezone the recurrence is evaluated in (scheduled tasks only)
    pub timezone: Option<String>,
    /// Next instant the task is due (scheduled tasks only)
    pub next_run_at: Option<UniversalTimestamp>,
    /// Instant of the most recent execution
    pub last_run_at: Option<UniversalTimestamp>,
    /// Trigger type this task listens for (event-based tasks only)
    pub trigger_type: Option<TriggerType>,
    /// Count of all execution attempts
    pub total_executions: i32,
    /// Count of successful execution attempts
    pub successful_executions: i32,
    /// Count of failed execution attempts
    pub failed_executions: i32,
    /// Failed attempts since the last success; drives the failure policy
    pub consecutive_failures: i32,
    /// Optional cap on total executions (strictly positive when present)
    pub max_executions: Option<i32>,
    /// Start of the validity window, inclusive
    pub start_date: Option<UniversalTimestamp>,
    /// End of the validity window, inclusive
    pub end_date: Option<UniversalTimestamp>,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Dispatch lease; non-null while an execution is in flight
    pub claimed_at: Option<UniversalTimestamp>,
    /// When the record was created
    pub created_at: UniversalTimestamp,
    /// When the record was last updated
    pub updated_at: UniversalTimestamp,
}

impl AgentTask {
    /// Whether the execution cap still allows another run.
    pub fn under_execution_cap(&self) -> bool {
        match self.max_executions {
            Some(cap) => self.total_executions < cap,
            None => true,
        }
    }

    /// Whether `now` falls inside the task's validity window.
    pub fn within_validity_window(&self, now: DateTime<Utc>) -> bool {
        if let Some(start) = self.start_date {
            if now < start.0 {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if now > end.0 {
                return false;
            }
        }
        true
    }
}

/// Structure for creating new agent tasks (domain type).
///
/// The id, counters, status, and bookkeeping timestamps are set by the DAL;
/// everything the caller controls lives here.
#[derive(Debug, Clone)]
pub struct NewAgentTask {
    pub agent_id: UniversalUuid,
    pub principal_id: UniversalUuid,
    pub name: String,
    pub kind: TaskKind,
    pub instructions: String,
    pub allowed_tools: Vec<String>,
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub next_run_at: Option<UniversalTimestamp>,
    pub trigger_type: Option<TriggerType>,
    pub max_executions: Option<i32>,
    pub start_date: Option<UniversalTimestamp>,
    pub end_date: Option<UniversalTimestamp>,
}

impl NewAgentTask {
    /// Checks the data-model invariants.
    ///
    /// A scheduled task must carry a recurrence expression and timezone; an
    /// event-based task must carry a trigger type; `max_executions` must be
    /// strictly positive when present; `start_date` must precede `end_date`
    /// when both are present.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.kind {
            TaskKind::Scheduled => {
                if self.cron_expression.is_none() || self.timezone.is_none() {
                    return Err(ValidationError::MissingRecurrence);
                }
            }
            TaskKind::EventBased => {
                if self.trigger_type.is_none() {
                    return Err(ValidationError::MissingTriggerType);
                }
            }
        }

        if let Some(cap) = self.max_executions {
            if cap <= 0 {
                return Err(ValidationError::NonPositiveMaxExecutions(cap));
            }
        }

        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start.0 >= end.0 {
                return Err(ValidationError::InvalidDateRange);
            }
        }

        Ok(())
    }
}

/// Mutable fields of a task; `None` leaves a field unchanged.
///
/// Recurrence changes go through
/// [`crate::runner::TaskEngine::reschedule_task`] instead, since they require
/// recompiling the expression and recomputing `next_run_at` together.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub instructions: Option<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub max_executions: Option<i32>,
    pub start_date: Option<UniversalTimestamp>,
    pub end_date: Option<UniversalTimestamp>,
}
