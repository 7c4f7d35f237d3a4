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

//! # Carillon
//!
//! An embedded scheduling and execution engine for agent tasks. Carillon
//! lets an agent platform persist two kinds of work — recurring scheduled
//! tasks compiled from structured recurrences, and event-based tasks fired
//! by typed inbound events — and runs both through a claim-protected
//! dispatch pipeline that records every attempt in an append-only execution
//! ledger.
//!
//! ## Key Features
//!
//! - **Structured recurrences**: callers describe schedules as data
//!   ([`RecurrenceSpec`]); the engine compiles them to canonical five-field
//!   expressions, evaluates them in the task's IANA timezone, and decompiles
//!   stored expressions for editing.
//! - **Event triggers**: named, independently toggleable condition sets
//!   ([`TriggerCondition`]) matched against inbound [`AgentEvent`]s, with
//!   per-trigger cooldown suppression.
//! - **Exactly-one dispatch**: a conditional-update claim with a lease
//!   timeout guarantees one live execution per task, across the poll loop,
//!   event fires, and manual runs.
//! - **Append-only ledger**: every attempt is a [`TaskExecution`] row with a
//!   frozen snapshot of the instructions and tool allow-list.
//! - **Failure isolation**: collaborator errors and timeouts are recorded,
//!   counted, and capped by a consecutive-failure circuit breaker; they
//!   never halt the engine.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use carillon::{RecurrenceSpec, RecurringSpec, RecurrenceUnit, TaskEngine};
//!
//! let engine = TaskEngine::new("tasks.db", Arc::new(MyInvoker)).await?;
//! let task = engine
//!     .create_scheduled_task(ScheduledTaskRequest {
//!         agent_id,
//!         principal_id,
//!         name: "daily digest".into(),
//!         instructions: "Summarize yesterday's activity".into(),
//!         allowed_tools: vec!["search".into()],
//!         recurrence: RecurrenceSpec::Recurring(RecurringSpec {
//!             interval: 1,
//!             unit: RecurrenceUnit::Day,
//!             anchor_date: today,
//!             anchor_time: nine_am,
//!             timezone: "America/New_York".into(),
//!             end_date: None,
//!         }),
//!         max_executions: None,
//!         start_date: None,
//!     })
//!     .await?;
//! ```

pub mod dal;
pub mod database;
pub mod error;
pub mod executor;
pub mod models;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod trigger;

pub use database::universal_types::{UniversalBool, UniversalTimestamp, UniversalUuid};
pub use database::Database;
pub use error::{
    EngineError, ExecutionError, InvocationError, SchedulingError, TriggerError, ValidationError,
};
pub use executor::{AgentInvoker, InvocationRequest, InvocationResult};
pub use models::event_trigger::{EventTrigger, NewEventTrigger};
pub use models::execution::{
    ExecutionStats, ExecutionStatus, TaskExecution, TriggerSource,
};
pub use models::task::{AgentTask, TaskKind, TaskStatus, TaskUpdate};
pub use runner::{
    EngineConfig, EngineConfigBuilder, EventTaskRequest, ScheduledTaskRequest, TaskEngine,
    TriggerSpec,
};
pub use schedule::{
    decompile, CompiledSchedule, OneTimeSpec, RecurrenceSpec, RecurrenceUnit, RecurringSpec,
    ScheduleShape,
};
pub use trigger::{AgentEvent, EventOutcome, TriggerCondition, TriggerType};
