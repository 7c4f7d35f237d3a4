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

//! Task Execution DAL
//!
//! Storage operations for the execution ledger. Rows only ever move forward
//! (`pending → running → terminal`); every transition is a conditional UPDATE
//! filtered on the source status, so a row that has already reached a
//! terminal state is never rewritten.

use diesel::dsl::count_star;
use diesel::prelude::*;

use super::models::{
    current_timestamp_string, uuid_to_blob, NewSqliteTaskExecution, SqliteTaskExecution,
};
use super::DAL;
use crate::database::schema::task_executions;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::ValidationError;
use crate::models::execution::{
    ExecutionStats, ExecutionStatus, NewTaskExecution, TaskExecution,
};

/// Data access layer for execution ledger operations.
#[derive(Clone)]
pub struct TaskExecutionDAL<'a> {
    dal: &'a DAL,
}

impl<'a> TaskExecutionDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Appends a `pending` ledger row with the frozen dispatch snapshot.
    pub async fn create(
        &self,
        new_execution: NewTaskExecution,
    ) -> Result<TaskExecution, ValidationError> {
        let conn = self.dal.connection().await?;

        let id = UniversalUuid::new_v4();
        let id_blob = uuid_to_blob(&id.0);
        let now = current_timestamp_string();

        let trigger_payload = match &new_execution.trigger_payload {
            Some(payload) => Some(serde_json::to_string(payload)?),
            None => None,
        };
        let metadata = match &new_execution.metadata {
            Some(metadata) => Some(serde_json::to_string(metadata)?),
            None => None,
        };

        let row = NewSqliteTaskExecution {
            id: id_blob,
            task_id: uuid_to_blob(&new_execution.task_id.0),
            agent_id: uuid_to_blob(&new_execution.agent_id.0),
            status: ExecutionStatus::Pending.to_string(),
            trigger_source: new_execution.trigger_source.to_string(),
            trigger_payload,
            instructions: new_execution.instructions,
            allowed_tools: serde_json::to_string(&new_execution.allowed_tools)?,
            metadata,
            created_at: now.clone(),
            updated_at: now,
        };

        conn.interact(move |conn| {
            diesel::insert_into(task_executions::table)
                .values(&row)
                .execute(conn)
        })
        .await
        .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;
        drop(conn);

        self.get_by_id(id).await
    }

    /// Retrieves an execution by its ID.
    pub async fn get_by_id(&self, id: UniversalUuid) -> Result<TaskExecution, ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let row: Option<SqliteTaskExecution> = conn
            .interact(move |conn| task_executions::table.find(id_blob).first(conn).optional())
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        row.map(Into::into)
            .ok_or(ValidationError::ExecutionNotFound(id))
    }

    /// Moves a `pending` execution to `running`, stamping `started_at`.
    /// Returns `false` when the row was no longer pending (cancelled while
    /// queued).
    pub async fn mark_running(
        &self,
        id: UniversalUuid,
        started_at: UniversalTimestamp,
    ) -> Result<bool, ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let now_ts = current_timestamp_string();
        let updated_rows = conn
            .interact(move |conn| {
                diesel::update(task_executions::table.find(id_blob))
                    .filter(task_executions::status.eq(ExecutionStatus::Pending.to_string()))
                    .set((
                        task_executions::status.eq(ExecutionStatus::Running.to_string()),
                        task_executions::started_at.eq(Some(started_at.to_rfc3339())),
                        task_executions::updated_at.eq(now_ts),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(updated_rows == 1)
    }

    /// Moves a `running` execution to `completed` with the collaborator's
    /// output. Returns `false` when the row was no longer running (cancelled
    /// mid-flight), in which case the result is discarded.
    pub async fn mark_completed(
        &self,
        id: UniversalUuid,
        completed_at: UniversalTimestamp,
        duration_ms: i64,
        output: String,
        tool_outputs: Option<serde_json::Value>,
    ) -> Result<bool, ValidationError> {
        let tool_outputs = match &tool_outputs {
            Some(outputs) => Some(serde_json::to_string(outputs)?),
            None => None,
        };

        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let now_ts = current_timestamp_string();
        let updated_rows = conn
            .interact(move |conn| {
                diesel::update(task_executions::table.find(id_blob))
                    .filter(task_executions::status.eq(ExecutionStatus::Running.to_string()))
                    .set((
                        task_executions::status.eq(ExecutionStatus::Completed.to_string()),
                        task_executions::completed_at.eq(Some(completed_at.to_rfc3339())),
                        task_executions::duration_ms.eq(Some(duration_ms)),
                        task_executions::output.eq(Some(output)),
                        task_executions::tool_outputs.eq(tool_outputs),
                        task_executions::updated_at.eq(now_ts),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(updated_rows == 1)
    }

    /// Moves a `pending` or `running` execution to `failed` with error
    /// detail. Returns `false` when the row had already reached a terminal
    /// state.
    pub async fn mark_failed(
        &self,
        id: UniversalUuid,
        completed_at: UniversalTimestamp,
        duration_ms: Option<i64>,
        error_message: String,
    ) -> Result<bool, ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let now_ts = current_timestamp_string();
        let updated_rows = conn
            .interact(move |conn| {
                diesel::update(task_executions::table.find(id_blob))
                    .filter(task_executions::status.eq_any([
                        ExecutionStatus::Pending.to_string(),
                        ExecutionStatus::Running.to_string(),
                    ]))
                    .set((
                        task_executions::status.eq(ExecutionStatus::Failed.to_string()),
                        task_executions::completed_at.eq(Some(completed_at.to_rfc3339())),
                        task_executions::duration_ms.eq(duration_ms),
                        task_executions::error_message.eq(Some(error_message)),
                        task_executions::updated_at.eq(now_ts),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(updated_rows == 1)
    }

    /// Moves a `pending` or `running` execution to `cancelled`. Returns
    /// `false` when the row had already reached a terminal state.
    pub async fn mark_cancelled(
        &self,
        id: UniversalUuid,
        completed_at: UniversalTimestamp,
        reason: String,
    ) -> Result<bool, ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let now_ts = current_timestamp_string();
        let updated_rows = conn
            .interact(move |conn| {
                diesel::update(task_executions::table.find(id_blob))
                    .filter(task_executions::status.eq_any([
                        ExecutionStatus::Pending.to_string(),
                        ExecutionStatus::Running.to_string(),
                    ]))
                    .set((
                        task_executions::status.eq(ExecutionStatus::Cancelled.to_string()),
                        task_executions::completed_at.eq(Some(completed_at.to_rfc3339())),
                        task_executions::error_message.eq(Some(reason)),
                        task_executions::updated_at.eq(now_ts),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(updated_rows == 1)
    }

    /// Lists a task's executions, newest first.
    pub async fn list_by_task(
        &self,
        task_id: UniversalUuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskExecution>, ValidationError> {
        let conn = self.dal.connection().await?;

        let task_blob = uuid_to_blob(&task_id.0);
        let rows: Vec<SqliteTaskExecution> = conn
            .interact(move |conn| {
                task_executions::table
                    .filter(task_executions::task_id.eq(task_blob))
                    .order(task_executions::created_at.desc())
                    .limit(limit)
                    .offset(offset)
                    .load(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Aggregate counts and average duration for a task's ledger.
    pub async fn stats(&self, task_id: UniversalUuid) -> Result<ExecutionStats, ValidationError> {
        let conn = self.dal.connection().await?;

        let task_blob = uuid_to_blob(&task_id.0);
        let (total, completed, failed, cancelled, completed_durations) = conn
            .interact(move |conn| {
                let by_status = |status: ExecutionStatus,
                                 conn: &mut diesel::sqlite::SqliteConnection|
                 -> Result<i64, diesel::result::Error> {
                    task_executions::table
                        .filter(task_executions::task_id.eq(task_blob.clone()))
                        .filter(task_executions::status.eq(status.to_string()))
                        .select(count_star())
                        .first(conn)
                };

                let total: i64 = task_executions::table
                    .filter(task_executions::task_id.eq(task_blob.clone()))
                    .select(count_star())
                    .first(conn)?;
                let completed = by_status(ExecutionStatus::Completed, conn)?;
                let failed = by_status(ExecutionStatus::Failed, conn)?;
                let cancelled = by_status(ExecutionStatus::Cancelled, conn)?;
                let completed_durations: Vec<Option<i64>> = task_executions::table
                    .filter(task_executions::task_id.eq(task_blob))
                    .filter(task_executions::status.eq(ExecutionStatus::Completed.to_string()))
                    .select(task_executions::duration_ms)
                    .load(conn)?;

                Ok::<_, diesel::result::Error>((
                    total,
                    completed,
                    failed,
                    cancelled,
                    completed_durations,
                ))
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        let durations: Vec<i64> = completed_durations.into_iter().flatten().collect();
        let average_duration_ms = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<i64>() as f64 / durations.len() as f64)
        };

        Ok(ExecutionStats {
            total,
            completed,
            failed,
            cancelled,
            average_duration_ms,
        })
    }

    /// Fails every non-terminal execution left behind by a previous process.
    /// Startup recovery only; returns the number of rows swept.
    pub async fn sweep_abandoned(&self, error_message: &str) -> Result<usize, ValidationError> {
        let conn = self.dal.connection().await?;

        let now_ts = current_timestamp_string();
        let message = error_message.to_string();
        let swept = conn
            .interact(move |conn| {
                diesel::update(task_executions::table)
                    .filter(task_executions::status.eq_any([
                        ExecutionStatus::Pending.to_string(),
                        ExecutionStatus::Running.to_string(),
                    ]))
                    .set((
                        task_executions::status.eq(ExecutionStatus::Failed.to_string()),
                        task_executions::completed_at.eq(Some(now_ts.clone())),
                        task_executions::error_message.eq(Some(message)),
                        task_executions::updated_at.eq(now_ts),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(swept)
    }
}
