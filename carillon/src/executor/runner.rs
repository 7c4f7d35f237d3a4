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

//! Execution Runner
//!
//! Dispatches one task execution end to end: claim the task, append a
//! `pending` ledger row with a frozen snapshot, invoke the collaborator under
//! a timeout, and record the outcome. The claim is held for the entire
//! invocation and released only afterwards — a slow run is never retroactively
//! un-claimed; the lease timeout exists solely for dead dispatchers.
//!
//! Collaborator failures and timeouts are recorded on the execution row and
//! reflected in the task's counters; they are never raised to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::dal::DAL;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::ExecutionError;
use crate::executor::invoker::{AgentInvoker, InvocationRequest};
use crate::models::execution::{NewTaskExecution, TaskExecution, TriggerSource};
use crate::models::task::{AgentTask, TaskKind, TaskStatus};
use crate::schedule::next_occurrence;

/// Runs individual task executions against the collaborator.
///
/// `Clone`-free by design; share it behind an `Arc`.
pub struct ExecutionRunner {
    dal: DAL,
    invoker: Arc<dyn AgentInvoker>,
    execution_timeout: Duration,
    claim_lease_timeout: chrono::Duration,
    consecutive_failure_limit: Option<u32>,
    /// Task id -> in-flight execution id, for cancellation.
    in_flight: Mutex<HashMap<UniversalUuid, UniversalUuid>>,
}

impl ExecutionRunner {
    pub fn new(
        dal: DAL,
        invoker: Arc<dyn AgentInvoker>,
        execution_timeout: Duration,
        claim_lease_timeout: chrono::Duration,
        consecutive_failure_limit: Option<u32>,
    ) -> Self {
        Self {
            dal,
            invoker,
            execution_timeout,
            claim_lease_timeout,
            consecutive_failure_limit,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatches one execution of a task.
    ///
    /// Fails fast with [`ExecutionError::TaskNotRunnable`] when the task is
    /// not active and [`ExecutionError::TaskAlreadyRunning`] when another
    /// dispatch holds the claim. Once the ledger row exists, collaborator
    /// outcomes (success, failure, timeout) are recorded on it and the row is
    /// returned in its final state.
    pub async fn dispatch(
        &self,
        task_id: UniversalUuid,
        source: TriggerSource,
        payload: Option<serde_json::Value>,
    ) -> Result<TaskExecution, ExecutionError> {
        let task = self.dal.agent_tasks().get_by_id(task_id).await?;
        if task.status != TaskStatus::Active {
            return Err(ExecutionError::TaskNotRunnable {
                task_id,
                status: task.status,
            });
        }

        let now = Utc::now();
        if !self
            .dal
            .agent_tasks()
            .claim(task_id, now, self.claim_lease_timeout)
            .await?
        {
            return Err(ExecutionError::TaskAlreadyRunning(task_id));
        }

        // Claim held from here on. Run the body and always release,
        // whatever the outcome.
        let result = self.run_claimed(&task, source, payload).await;
        self.in_flight.lock().remove(&task_id);
        if let Err(e) = self.dal.agent_tasks().release_claim(task_id).await {
            warn!(task_id = %task_id, "Failed to release task claim: {}", e);
        }
        result
    }

    /// Cancels a task's in-flight execution, if any. Returns whether an
    /// execution row was moved to `cancelled`.
    pub async fn cancel_in_flight(
        &self,
        task_id: UniversalUuid,
        reason: &str,
    ) -> Result<bool, ExecutionError> {
        let execution_id = { self.in_flight.lock().get(&task_id).copied() };
        let Some(execution_id) = execution_id else {
            return Ok(false);
        };

        let cancelled = self
            .dal
            .task_executions()
            .mark_cancelled(
                execution_id,
                UniversalTimestamp::now(),
                reason.to_string(),
            )
            .await?;
        if cancelled {
            debug!(task_id = %task_id, execution_id = %execution_id, "Cancelled in-flight execution");
        }
        Ok(cancelled)
    }

    async fn run_claimed(
        &self,
        task: &AgentTask,
        source: TriggerSource,
        payload: Option<serde_json::Value>,
    ) -> Result<TaskExecution, ExecutionError> {
        let executions = self.dal.task_executions();
        let tasks = self.dal.agent_tasks();

        let execution = executions
            .create(NewTaskExecution {
                task_id: task.id,
                agent_id: task.agent_id,
                trigger_source: source,
                trigger_payload: payload.clone(),
                instructions: task.instructions.clone(),
                allowed_tools: task.allowed_tools.clone(),
                metadata: None,
            })
            .await?;
        self.in_flight.lock().insert(task.id, execution.id);

        if !executions
            .mark_running(execution.id, UniversalTimestamp::now())
            .await?
        {
            // Cancelled while pending; nothing ran, no bookkeeping.
            return Ok(executions.get_by_id(execution.id).await?);
        }

        let request = InvocationRequest {
            agent_id: task.agent_id,
            task_id: task.id,
            execution_id: execution.id,
            instructions: task.instructions.clone(),
            allowed_tools: task.allowed_tools.clone(),
            trigger_source: source,
            trigger_payload: payload,
        };

        let started = std::time::Instant::now();
        let outcome =
            tokio::time::timeout(self.execution_timeout, self.invoker.invoke(request)).await;
        let elapsed_ms = started.elapsed().as_millis() as i64;
        let finished_at = UniversalTimestamp::now();

        match outcome {
            Ok(Ok(result)) => {
                let tool_outputs = if result.tool_outputs.is_empty() {
                    None
                } else {
                    Some(serde_json::Value::Array(result.tool_outputs))
                };
                let recorded = executions
                    .mark_completed(
                        execution.id,
                        finished_at,
                        result.duration_ms,
                        result.output,
                        tool_outputs,
                    )
                    .await?;
                if recorded {
                    tasks.record_success(task.id, finished_at).await?;
                    let capped = tasks.complete_if_capped(task.id).await?;
                    if !capped {
                        self.advance_schedule(task, source).await;
                    }
                } else {
                    debug!(execution_id = %execution.id, "Result discarded, execution was cancelled mid-flight");
                }
            }
            Ok(Err(invocation_error)) => {
                let recorded = executions
                    .mark_failed(
                        execution.id,
                        finished_at,
                        Some(elapsed_ms),
                        invocation_error.to_string(),
                    )
                    .await?;
                if recorded {
                    self.record_failure_outcome(task, source, finished_at).await?;
                }
            }
            Err(_elapsed) => {
                let message = format!(
                    "Execution timed out after {}s",
                    self.execution_timeout.as_secs()
                );
                warn!(task_id = %task.id, execution_id = %execution.id, "{}", message);
                let recorded = executions
                    .mark_failed(execution.id, finished_at, Some(elapsed_ms), message)
                    .await?;
                if recorded {
                    self.record_failure_outcome(task, source, finished_at).await?;
                }
            }
        }

        Ok(executions.get_by_id(execution.id).await?)
    }

    async fn record_failure_outcome(
        &self,
        task: &AgentTask,
        source: TriggerSource,
        finished_at: UniversalTimestamp,
    ) -> Result<(), ExecutionError> {
        let tasks = self.dal.agent_tasks();
        tasks.record_failure(task.id, finished_at).await?;
        let disabled = match self.consecutive_failure_limit {
            // The failure counter column is an i32; the config builder
            // rejects larger limits.
            Some(limit) => {
                let limit = limit.min(i32::MAX as u32) as i32;
                tasks.fail_if_over_limit(task.id, limit).await?
            }
            None => false,
        };
        if disabled {
            warn!(task_id = %task.id, "Task disabled after repeated consecutive failures");
        } else {
            self.advance_schedule(task, source).await;
        }
        Ok(())
    }

    /// Advances `next_run_at` past the run that just finished.
    ///
    /// Applies only to scheduled-source dispatches of scheduled tasks: manual
    /// and event runs never alter the cadence. The new time is stored even
    /// when it falls past `end_date` — the due query's validity-window filter
    /// keeps such a task from dispatching, and leaving a stale past time in
    /// place would re-dispatch it every poll.
    async fn advance_schedule(&self, task: &AgentTask, source: TriggerSource) {
        if source != TriggerSource::Scheduled || task.kind != TaskKind::Scheduled {
            return;
        }
        let (Some(expression), Some(timezone)) = (&task.cron_expression, &task.timezone) else {
            return;
        };

        let now = Utc::now();
        match next_occurrence(expression, timezone, now, None) {
            Ok(next) => {
                if let Err(e) = self
                    .dal
                    .agent_tasks()
                    .update_next_run(task.id, UniversalTimestamp(next))
                    .await
                {
                    warn!(task_id = %task.id, "Failed to store next run time: {}", e);
                }
            }
            Err(e) => {
                warn!(task_id = %task.id, "Failed to compute next occurrence: {}", e);
            }
        }
    }
}
