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

//! Task Scheduler
//!
//! The poll loop that finds due scheduled tasks and dispatches them. Each
//! cycle queries for active scheduled tasks whose `next_run_at` has elapsed,
//! then dispatches each through the execution runner in a background task. A
//! semaphore caps concurrent executions; when every slot is busy the poll is
//! skipped entirely.
//!
//! The runner owns the claim protocol, so two pollers (or a poller and a
//! manual run) racing on the same task resolve to a single execution: the
//! loser gets `TaskAlreadyRunning` and moves on.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::time;
use tracing::{debug, error, info};

use crate::dal::DAL;
use crate::error::ExecutionError;
use crate::executor::ExecutionRunner;
use crate::models::execution::TriggerSource;

/// Polls for due scheduled tasks and dispatches them.
pub struct TaskScheduler {
    dal: DAL,
    runner: Arc<ExecutionRunner>,
    poll_interval: Duration,
    claim_lease_timeout: chrono::Duration,
    max_concurrent_executions: usize,
}

impl TaskScheduler {
    pub fn new(
        dal: DAL,
        runner: Arc<ExecutionRunner>,
        poll_interval: Duration,
        claim_lease_timeout: chrono::Duration,
        max_concurrent_executions: usize,
    ) -> Self {
        Self {
            dal,
            runner,
            poll_interval,
            claim_lease_timeout,
            max_concurrent_executions,
        }
    }

    /// Runs the poll loop until the shutdown signal flips to `true`.
    ///
    /// On shutdown the loop stops polling, waits for in-flight dispatches to
    /// finish, and returns.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            max_concurrent = self.max_concurrent_executions,
            "Starting task scheduler"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_executions));
        let mut interval = time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll_once(&semaphore).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Drain: every permit back means every spawned dispatch is done.
        let _ = semaphore
            .acquire_many(self.max_concurrent_executions as u32)
            .await;
        info!("Task scheduler stopped");
    }

    async fn poll_once(&self, semaphore: &Arc<Semaphore>) {
        // Only poll if we have available concurrency slots
        if semaphore.available_permits() == 0 {
            debug!("All execution slots busy, skipping poll");
            return;
        }

        let due = match self
            .dal
            .agent_tasks()
            .get_due_tasks(chrono::Utc::now(), self.claim_lease_timeout)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                error!("Failed to query due tasks: {}", e);
                return;
            }
        };

        if due.is_empty() {
            debug!("No due tasks found");
            return;
        }

        for task in due {
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("Execution slots exhausted mid-poll");
                    break;
                }
            };

            let runner = Arc::clone(&self.runner);
            let task_id = task.id;
            let task_name = task.name.clone();
            tokio::spawn(async move {
                let _permit = permit; // Hold permit until the dispatch completes

                debug!(task_id = %task_id, "Dispatching due task '{}'", task_name);
                match runner.dispatch(task_id, TriggerSource::Scheduled, None).await {
                    Ok(_) => {}
                    // Lost the claim race or the task left `active` between
                    // the query and the dispatch. Routine, not an error.
                    Err(ExecutionError::TaskAlreadyRunning(_))
                    | Err(ExecutionError::TaskNotRunnable { .. }) => {
                        debug!(task_id = %task_id, "Task no longer dispatchable, skipping");
                    }
                    Err(e) => {
                        error!(task_id = %task_id, "Dispatch failed: {}", e);
                    }
                }
            });
        }
    }
}
