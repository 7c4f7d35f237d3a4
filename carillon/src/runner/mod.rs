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

//! Task Engine Facade
//!
//! [`TaskEngine`] is the single entry point for host applications: it owns
//! the database, runs startup recovery, spawns the scheduler poll loop, and
//! exposes every task, execution, and trigger operation. Construction is
//! asynchronous because migrations and recovery run before the engine is
//! handed back.
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = TaskEngine::new("tasks.db", Arc::new(MyInvoker)).await?;
//!
//! let task = engine
//!     .create_scheduled_task(ScheduledTaskRequest {
//!         agent_id,
//!         principal_id,
//!         name: "daily digest".into(),
//!         instructions: "Summarize yesterday's activity".into(),
//!         allowed_tools: vec!["search".into()],
//!         recurrence: RecurrenceSpec::Recurring(spec),
//!         max_executions: None,
//!         start_date: None,
//!     })
//!     .await?;
//!
//! engine.shutdown().await;
//! ```

pub mod config;

pub use config::{EngineConfig, EngineConfigBuilder};

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::dal::DAL;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::database::Database;
use crate::error::{EngineError, ValidationError};
use crate::executor::{AgentInvoker, ExecutionRunner};
use crate::models::event_trigger::{EventTrigger, NewEventTrigger};
use crate::models::execution::{ExecutionStats, TaskExecution, TriggerSource};
use crate::models::task::{AgentTask, NewAgentTask, TaskKind, TaskStatus, TaskUpdate};
use crate::schedule::RecurrenceSpec;
use crate::scheduler::TaskScheduler;
use crate::trigger::engine::{EventOutcome, TriggerEngine};
use crate::trigger::event::{AgentEvent, TriggerType};
use crate::trigger::condition::TriggerCondition;

/// Everything needed to create a scheduled task.
#[derive(Debug, Clone)]
pub struct ScheduledTaskRequest {
    pub agent_id: UniversalUuid,
    pub principal_id: UniversalUuid,
    pub name: String,
    pub instructions: String,
    pub allowed_tools: Vec<String>,
    pub recurrence: RecurrenceSpec,
    /// Optional cap on total executions; one-time recurrences force this to 1.
    pub max_executions: Option<i32>,
    pub start_date: Option<UniversalTimestamp>,
}

/// Everything needed to create an event-based task with its initial triggers.
#[derive(Debug, Clone)]
pub struct EventTaskRequest {
    pub agent_id: UniversalUuid,
    pub principal_id: UniversalUuid,
    pub name: String,
    pub instructions: String,
    pub allowed_tools: Vec<String>,
    pub trigger_type: TriggerType,
    pub triggers: Vec<TriggerSpec>,
    pub max_executions: Option<i32>,
    pub start_date: Option<UniversalTimestamp>,
    pub end_date: Option<UniversalTimestamp>,
}

/// One initial trigger for an [`EventTaskRequest`].
#[derive(Debug, Clone)]
pub struct TriggerSpec {
    pub label: String,
    pub conditions: TriggerCondition,
    pub cooldown_minutes: i32,
}

/// The task scheduling and execution engine.
///
/// Owns the SQLite store, the scheduler poll loop, the trigger engine, and
/// the execution runner. Cheap to share behind an `Arc`; shut down
/// explicitly with [`TaskEngine::shutdown`].
pub struct TaskEngine {
    dal: DAL,
    runner: Arc<ExecutionRunner>,
    trigger_engine: TriggerEngine,
    shutdown_tx: watch::Sender<bool>,
    scheduler_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl TaskEngine {
    /// Creates an engine with the default configuration.
    pub async fn new(
        database_url: &str,
        invoker: Arc<dyn AgentInvoker>,
    ) -> Result<Self, EngineError> {
        Self::with_config(database_url, invoker, EngineConfig::default()).await
    }

    /// Creates an engine with an explicit configuration.
    ///
    /// Runs migrations, then startup recovery (sweep abandoned executions,
    /// clear stale claims), then spawns the poll loop when polling is
    /// enabled.
    pub async fn with_config(
        database_url: &str,
        invoker: Arc<dyn AgentInvoker>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let database = Database::new(database_url);
        database.run_migrations().await.map_err(EngineError::Database)?;
        let dal = DAL::new(database);

        if config.enable_recovery() {
            let swept = dal
                .task_executions()
                .sweep_abandoned("Abandoned by engine restart")
                .await?;
            let cleared = dal.agent_tasks().clear_all_claims().await?;
            if swept > 0 || cleared > 0 {
                warn!(
                    swept_executions = swept,
                    cleared_claims = cleared,
                    "Recovered state left behind by a previous process"
                );
            }
        }

        let lease = chrono::Duration::seconds(config.claim_lease_timeout().as_secs() as i64);
        let runner = Arc::new(ExecutionRunner::new(
            dal.clone(),
            invoker,
            config.execution_timeout(),
            lease,
            config.consecutive_failure_limit(),
        ));
        let trigger_engine = TriggerEngine::new(dal.clone(), Arc::clone(&runner));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler_handle = if config.enable_polling() {
            let scheduler = TaskScheduler::new(
                dal.clone(),
                Arc::clone(&runner),
                config.poll_interval(),
                lease,
                config.max_concurrent_executions(),
            );
            Some(tokio::spawn(async move {
                scheduler.run(shutdown_rx).await;
            }))
        } else {
            None
        };

        info!("Task engine started");
        Ok(Self {
            dal,
            runner,
            trigger_engine,
            shutdown_tx,
            scheduler_handle: parking_lot::Mutex::new(scheduler_handle),
        })
    }

    /// Stops the poll loop and waits for in-flight dispatches to finish.
    /// Idempotent; safe to call on an engine created without polling.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = { self.scheduler_handle.lock().take() };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Scheduler task panicked during shutdown: {}", e);
            }
        }
        info!("Task engine stopped");
    }

    // ------------------------------------------------------------------
    // Task CRUD
    // ------------------------------------------------------------------

    /// Creates a scheduled task from a recurrence.
    ///
    /// The recurrence is compiled before anything is persisted, so a task is
    /// never stored in an unschedulable state. One-time recurrences carry an
    /// implicit execution cap of 1 that overrides the request's cap.
    pub async fn create_scheduled_task(
        &self,
        request: ScheduledTaskRequest,
    ) -> Result<AgentTask, EngineError> {
        let compiled = request.recurrence.compile()?;
        let next_run_at = compiled.first_run_after(Utc::now())?;

        let task = self
            .dal
            .agent_tasks()
            .create(NewAgentTask {
                agent_id: request.agent_id,
                principal_id: request.principal_id,
                name: request.name,
                kind: TaskKind::Scheduled,
                instructions: request.instructions,
                allowed_tools: request.allowed_tools,
                cron_expression: Some(compiled.cron_expression),
                timezone: Some(compiled.timezone),
                next_run_at: Some(next_run_at),
                trigger_type: None,
                max_executions: compiled.max_executions.or(request.max_executions),
                start_date: request.start_date,
                end_date: compiled.end_date,
            })
            .await?;
        Ok(task)
    }

    /// Creates an event-based task together with its initial triggers.
    pub async fn create_event_task(
        &self,
        request: EventTaskRequest,
    ) -> Result<(AgentTask, Vec<EventTrigger>), EngineError> {
        let task = self
            .dal
            .agent_tasks()
            .create(NewAgentTask {
                agent_id: request.agent_id,
                principal_id: request.principal_id,
                name: request.name,
                kind: TaskKind::EventBased,
                instructions: request.instructions,
                allowed_tools: request.allowed_tools,
                cron_expression: None,
                timezone: None,
                next_run_at: None,
                trigger_type: Some(request.trigger_type),
                max_executions: request.max_executions,
                start_date: request.start_date,
                end_date: request.end_date,
            })
            .await?;

        let mut triggers = Vec::with_capacity(request.triggers.len());
        for spec in request.triggers {
            let trigger = self
                .dal
                .event_triggers()
                .create(NewEventTrigger {
                    task_id: task.id,
                    trigger_type: request.trigger_type,
                    label: spec.label,
                    conditions: spec.conditions,
                    active: true,
                    cooldown_minutes: spec.cooldown_minutes,
                })
                .await?;
            triggers.push(trigger);
        }

        Ok((task, triggers))
    }

    /// Updates a task's mutable fields. Recurrence changes go through
    /// [`TaskEngine::reschedule_task`].
    pub async fn update_task(
        &self,
        task_id: UniversalUuid,
        update: TaskUpdate,
    ) -> Result<AgentTask, EngineError> {
        Ok(self.dal.agent_tasks().update_details(task_id, update).await?)
    }

    /// Replaces a scheduled task's recurrence: recompiles the expression and
    /// recomputes `next_run_at` in one operation.
    pub async fn reschedule_task(
        &self,
        task_id: UniversalUuid,
        recurrence: RecurrenceSpec,
    ) -> Result<AgentTask, EngineError> {
        let task = self.dal.agent_tasks().get_by_id(task_id).await?;
        if task.kind != TaskKind::Scheduled {
            return Err(ValidationError::NotScheduled(task_id).into());
        }

        let compiled = recurrence.compile()?;
        let next_run_at = compiled.first_run_after(Utc::now())?;
        self.dal
            .agent_tasks()
            .update_schedule(
                task_id,
                compiled.cron_expression,
                compiled.timezone,
                next_run_at,
                compiled.end_date,
            )
            .await?;

        Ok(self.dal.agent_tasks().get_by_id(task_id).await?)
    }

    /// Deletes a task; its executions and triggers cascade.
    pub async fn delete_task(&self, task_id: UniversalUuid) -> Result<(), EngineError> {
        Ok(self.dal.agent_tasks().delete(task_id).await?)
    }

    /// Fetches a task by id.
    pub async fn get_task(&self, task_id: UniversalUuid) -> Result<AgentTask, EngineError> {
        Ok(self.dal.agent_tasks().get_by_id(task_id).await?)
    }

    /// Lists an agent's tasks, newest first.
    pub async fn list_tasks_for_agent(
        &self,
        agent_id: UniversalUuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AgentTask>, EngineError> {
        Ok(self
            .dal
            .agent_tasks()
            .list_by_agent(agent_id, limit, offset)
            .await?)
    }

    // ------------------------------------------------------------------
    // Dispatch and lifecycle
    // ------------------------------------------------------------------

    /// Runs a task immediately, outside its normal cadence.
    ///
    /// Goes through the same claim protocol as the poll loop, so it fails
    /// with `TaskAlreadyRunning` while a scheduled run is in flight. Manual
    /// runs never alter `next_run_at`.
    pub async fn run_now(&self, task_id: UniversalUuid) -> Result<TaskExecution, EngineError> {
        Ok(self
            .runner
            .dispatch(task_id, TriggerSource::Manual, None)
            .await?)
    }

    /// Pauses an active task. No side effects beyond dispatch eligibility.
    pub async fn pause_task(&self, task_id: UniversalUuid) -> Result<AgentTask, EngineError> {
        self.transition(task_id, TaskStatus::Active, TaskStatus::Paused)
            .await
    }

    /// Resumes a paused task.
    ///
    /// `next_run_at` is left untouched: a time that elapsed during the pause
    /// makes the task due on the next poll, after which the cadence resumes
    /// normally.
    pub async fn resume_task(&self, task_id: UniversalUuid) -> Result<AgentTask, EngineError> {
        self.transition(task_id, TaskStatus::Paused, TaskStatus::Active)
            .await
    }

    /// Cancels a task permanently and cancels its in-flight execution, if
    /// one is running.
    pub async fn cancel_task(&self, task_id: UniversalUuid) -> Result<AgentTask, EngineError> {
        let task = self.dal.agent_tasks().get_by_id(task_id).await?;
        if !task.status.can_transition_to(TaskStatus::Cancelled) {
            return Err(ValidationError::InvalidStatusTransition {
                from: task.status,
                to: TaskStatus::Cancelled,
            }
            .into());
        }

        self.runner
            .cancel_in_flight(task_id, "Task cancelled")
            .await?;
        self.transition(task_id, task.status, TaskStatus::Cancelled)
            .await
    }

    async fn transition(
        &self,
        task_id: UniversalUuid,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<AgentTask, EngineError> {
        if self.dal.agent_tasks().try_transition(task_id, from, to).await? {
            return Ok(self.dal.agent_tasks().get_by_id(task_id).await?);
        }
        // Lost a race or the caller's view was stale; report the actual
        // status.
        let current = self.dal.agent_tasks().get_by_id(task_id).await?;
        Err(ValidationError::InvalidStatusTransition {
            from: current.status,
            to,
        }
        .into())
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Fetches a single execution.
    pub async fn get_execution(
        &self,
        execution_id: UniversalUuid,
    ) -> Result<TaskExecution, EngineError> {
        Ok(self.dal.task_executions().get_by_id(execution_id).await?)
    }

    /// Lists a task's executions, newest first.
    pub async fn list_executions(
        &self,
        task_id: UniversalUuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskExecution>, EngineError> {
        Ok(self
            .dal
            .task_executions()
            .list_by_task(task_id, limit, offset)
            .await?)
    }

    /// Aggregate execution statistics for a task.
    pub async fn execution_stats(
        &self,
        task_id: UniversalUuid,
    ) -> Result<ExecutionStats, EngineError> {
        Ok(self.dal.task_executions().stats(task_id).await?)
    }

    // ------------------------------------------------------------------
    // Triggers and events
    // ------------------------------------------------------------------

    /// Adds a trigger to an event-based task.
    pub async fn add_trigger(
        &self,
        trigger: NewEventTrigger,
    ) -> Result<EventTrigger, EngineError> {
        Ok(self.dal.event_triggers().create(trigger).await?)
    }

    /// Lists a task's triggers.
    pub async fn list_triggers(
        &self,
        task_id: UniversalUuid,
    ) -> Result<Vec<EventTrigger>, EngineError> {
        Ok(self.dal.event_triggers().list_by_task(task_id).await?)
    }

    /// Toggles a trigger's active flag. Deactivation is the off switch;
    /// triggers are never auto-deleted.
    pub async fn set_trigger_active(
        &self,
        trigger_id: UniversalUuid,
        active: bool,
    ) -> Result<(), EngineError> {
        Ok(self
            .dal
            .event_triggers()
            .set_active(trigger_id, active)
            .await?)
    }

    /// Routes an inbound event through the trigger engine.
    pub async fn handle_event(&self, event: &AgentEvent) -> Result<EventOutcome, EngineError> {
        Ok(self.trigger_engine.handle_event(event).await?)
    }
}
