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

//! Domain models: tasks, their execution ledger, and event triggers.
//!
//! These are plain domain types built on the universal wrappers; the SQLite
//! row models and conversions live in the DAL.

pub mod event_trigger;
pub mod execution;
pub mod task;

pub use event_trigger::{EventTrigger, NewEventTrigger};
pub use execution::{
    ExecutionStats, ExecutionStatus, NewTaskExecution, TaskExecution, TriggerSource,
};
pub use task::{AgentTask, NewAgentTask, TaskKind, TaskStatus, TaskUpdate};
