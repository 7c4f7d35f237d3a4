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

//! Data Access Layer
//!
//! Entry point for all persistence operations. The [`DAL`] struct wraps the
//! connection pool and hands out per-entity accessors:
//!
//! - [`AgentTaskDAL`] — task records, claims, counters, status transitions
//! - [`TaskExecutionDAL`] — the append-only execution ledger
//! - [`EventTriggerDAL`] — trigger records and the cooldown fire gate
//!
//! Domain types cross this boundary; SQLite row models stay inside it.
//!
//! # Example
//!
//! ```rust,ignore
//! let dal = DAL::new(database);
//! let task = dal.agent_tasks().get_by_id(task_id).await?;
//! let history = dal.task_executions().list_by_task(task.id, 20, 0).await?;
//! ```

pub mod agent_task;
pub mod event_trigger;
pub mod models;
pub mod task_execution;

pub use agent_task::AgentTaskDAL;
pub use event_trigger::EventTriggerDAL;
pub use task_execution::TaskExecutionDAL;

use deadpool_diesel::sqlite::Manager;

use crate::database::Database;
use crate::error::ValidationError;

/// Data access layer over the engine's SQLite database.
///
/// `Clone` is cheap: clones share the same underlying pool.
#[derive(Clone)]
pub struct DAL {
    database: Database,
}

impl std::fmt::Debug for DAL {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DAL({:?})", self.database)
    }
}

impl DAL {
    /// Creates a new DAL instance over an initialized database.
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Checks out a pooled connection for an `interact` closure.
    pub(crate) async fn connection(
        &self,
    ) -> Result<deadpool::managed::Object<Manager>, ValidationError> {
        Ok(self.database.get_connection().await?)
    }

    /// Access to agent task operations.
    pub fn agent_tasks(&self) -> AgentTaskDAL<'_> {
        AgentTaskDAL::new(self)
    }

    /// Access to execution ledger operations.
    pub fn task_executions(&self) -> TaskExecutionDAL<'_> {
        TaskExecutionDAL::new(self)
    }

    /// Access to event trigger operations.
    pub fn event_triggers(&self) -> EventTriggerDAL<'_> {
        EventTriggerDAL::new(self)
    }
}
