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

//! Error types for task validation, schedule compilation, and execution.
//!
//! The taxonomy mirrors how errors propagate through the engine:
//!
//! - [`ValidationError`] — a task or trigger violates a data-model invariant,
//!   or a storage operation fails. Caller-visible, blocks persistence.
//! - [`SchedulingError`] — a recurrence cannot be compiled or its next
//!   occurrence cannot be computed. Caller-visible; a task is never persisted
//!   in an unschedulable state.
//! - [`ExecutionError`] — dispatch-path failures (claim lost, task not
//!   runnable). Collaborator failures and timeouts are *recorded* on the
//!   execution row instead of being raised, so one task's failure cannot halt
//!   the poll cycle or trigger evaluation for other tasks.
//! - [`TriggerError`] — event-path persistence failures. A matched trigger
//!   suppressed by its cooldown is *not* an error; it is logged and counted
//!   in the event outcome.
//! - [`EngineError`] — facade-level wrapper returned by [`crate::TaskEngine`].

use thiserror::Error;

use crate::database::universal_types::UniversalUuid;
use crate::models::task::TaskStatus;
use crate::schedule::recurrence::RecurrenceUnit;

/// Errors raised when a task or trigger violates a data-model invariant, or
/// when the storage layer fails underneath a validation-checked operation.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// A scheduled task is missing its recurrence expression or timezone.
    #[error("Scheduled tasks require a recurrence expression and timezone")]
    MissingRecurrence,

    /// An event-based task is missing its trigger type.
    #[error("Event-based tasks require a trigger type")]
    MissingTriggerType,

    /// `max_executions` must be strictly positive when present.
    #[error("max_executions must be positive, got {0}")]
    NonPositiveMaxExecutions(i32),

    /// `start_date` must precede `end_date` when both are present.
    #[error("start_date must be earlier than end_date")]
    InvalidDateRange,

    /// Trigger cooldowns are expressed in whole non-negative minutes.
    #[error("Trigger cooldown must be non-negative, got {0} minutes")]
    NegativeCooldown(i32),

    /// The trigger's type does not match its parent task's trigger type.
    #[error("Trigger type {trigger} does not match task trigger type {task}")]
    TriggerTypeMismatch { trigger: String, task: String },

    /// No task exists with the given id.
    #[error("Task {0} not found")]
    TaskNotFound(UniversalUuid),

    /// No execution exists with the given id.
    #[error("Execution {0} not found")]
    ExecutionNotFound(UniversalUuid),

    /// No event trigger exists with the given id.
    #[error("Event trigger {0} not found")]
    TriggerNotFound(UniversalUuid),

    /// A schedule operation was attempted on an event-based task.
    #[error("Task {0} is not a scheduled task")]
    NotScheduled(UniversalUuid),

    /// The requested lifecycle transition is not part of the state machine.
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: TaskStatus, to: TaskStatus },

    /// A JSON column (tool list, conditions, metadata) failed to serialize.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to get a connection from the pool.
    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    /// A query failed inside the database.
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
}

impl From<deadpool::managed::PoolError<deadpool_diesel::Error>> for ValidationError {
    fn from(err: deadpool::managed::PoolError<deadpool_diesel::Error>) -> Self {
        ValidationError::ConnectionPool(err.to_string())
    }
}

/// Errors raised by the schedule compiler and the next-run calculator.
#[derive(Error, Debug)]
pub enum SchedulingError {
    /// The recurrence expression could not be parsed.
    #[error("Invalid recurrence expression '{expression}': {source}")]
    InvalidExpression {
        expression: String,
        #[source]
        source: croner::errors::CronError,
    },

    /// The timezone name is not a known IANA zone.
    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    /// The interval cannot be represented in the recurrence expression.
    #[error("Interval {interval} is out of range for unit {unit}")]
    UnsupportedInterval { unit: RecurrenceUnit, interval: u32 },

    /// The anchor date/time does not exist (for example February 30th).
    #[error("Invalid schedule anchor: {0}")]
    InvalidAnchor(String),

    /// The expression never matches again (for example a pinned date past
    /// the search horizon).
    #[error("No upcoming occurrence for '{expression}' in timezone {timezone}")]
    NoUpcomingOccurrence {
        expression: String,
        timezone: String,
    },
}

/// Errors raised on the dispatch path before an execution row reaches a
/// terminal state. Collaborator failures are recorded, not raised.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Another dispatch holds the task's claim.
    #[error("Task {0} is already running")]
    TaskAlreadyRunning(UniversalUuid),

    /// The task is not in a status that allows execution.
    #[error("Task {task_id} cannot run in status {status}")]
    TaskNotRunnable {
        task_id: UniversalUuid,
        status: TaskStatus,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}

/// Errors raised by the agent invocation collaborator.
///
/// These become the `error_message` on a failed execution row; they never
/// escape the execution runner.
#[derive(Error, Debug)]
pub enum InvocationError {
    /// The collaborator reported a failure.
    #[error("Agent invocation failed: {0}")]
    Failed(String),

    /// The collaborator returned a result the runner could not interpret.
    #[error("Agent returned a malformed result: {0}")]
    MalformedResult(String),
}

/// Errors raised on the event-ingestion path.
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Facade-level error returned by [`crate::TaskEngine`] operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Pool construction or migration failure during startup.
    #[error("Database initialization failed: {0}")]
    Database(String),

    /// The engine configuration is unusable.
    #[error("Invalid engine configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),
}
