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

//! Agent Task DAL
//!
//! Storage operations for task records. Every state transition and counter
//! update is a single conditional UPDATE; callers learn whether they won a
//! race from the affected-row count, never from a read-then-write sequence.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;

use super::models::{
    current_timestamp_string, uuid_to_blob, NewSqliteAgentTask, SqliteAgentTask,
};
use super::DAL;
use crate::database::schema::agent_tasks;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::ValidationError;
use crate::models::task::{AgentTask, NewAgentTask, TaskStatus, TaskUpdate};

/// Data access layer for agent task operations.
#[derive(Clone)]
pub struct AgentTaskDAL<'a> {
    dal: &'a DAL,
}

impl<'a> AgentTaskDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Validates and inserts a new task, returning the stored record.
    ///
    /// Tasks are always created `active`.
    pub async fn create(&self, new_task: NewAgentTask) -> Result<AgentTask, ValidationError> {
        new_task.validate()?;

        let conn = self.dal.connection().await?;

        let id = UniversalUuid::new_v4();
        let id_blob = uuid_to_blob(&id.0);
        let now = current_timestamp_string();

        let row = NewSqliteAgentTask {
            id: id_blob.clone(),
            agent_id: uuid_to_blob(&new_task.agent_id.0),
            principal_id: uuid_to_blob(&new_task.principal_id.0),
            name: new_task.name,
            kind: new_task.kind.to_string(),
            instructions: new_task.instructions,
            allowed_tools: serde_json::to_string(&new_task.allowed_tools)?,
            cron_expression: new_task.cron_expression,
            timezone: new_task.timezone,
            next_run_at: new_task.next_run_at.map(|t| t.to_rfc3339()),
            trigger_type: new_task.trigger_type.map(|t| t.to_string()),
            max_executions: new_task.max_executions,
            start_date: new_task.start_date.map(|t| t.to_rfc3339()),
            end_date: new_task.end_date.map(|t| t.to_rfc3339()),
            status: TaskStatus::Active.to_string(),
            created_at: now.clone(),
            updated_at: now,
        };

        conn.interact(move |conn| {
            diesel::insert_into(agent_tasks::table)
                .values(&row)
                .execute(conn)
        })
        .await
        .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;
        drop(conn);

        self.get_by_id(id).await
    }

    /// Retrieves a task by its ID.
    pub async fn get_by_id(&self, id: UniversalUuid) -> Result<AgentTask, ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let row: Option<SqliteAgentTask> = conn
            .interact(move |conn| agent_tasks::table.find(id_blob).first(conn).optional())
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        row.map(Into::into)
            .ok_or(ValidationError::TaskNotFound(id))
    }

    /// Lists tasks owned by an agent, newest first.
    pub async fn list_by_agent(
        &self,
        agent_id: UniversalUuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AgentTask>, ValidationError> {
        let conn = self.dal.connection().await?;

        let agent_blob = uuid_to_blob(&agent_id.0);
        let rows: Vec<SqliteAgentTask> = conn
            .interact(move |conn| {
                agent_tasks::table
                    .filter(agent_tasks::agent_id.eq(agent_blob))
                    .order(agent_tasks::created_at.desc())
                    .limit(limit)
                    .offset(offset)
                    .load(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Retrieves scheduled tasks that are due for dispatch.
    ///
    /// A task is due when it is active, its `next_run_at` has elapsed, `now`
    /// falls inside its validity window, and it is unclaimed (or its claim is
    /// older than the lease timeout, the crashed-dispatcher case).
    pub async fn get_due_tasks(
        &self,
        now: DateTime<Utc>,
        lease_timeout: Duration,
    ) -> Result<Vec<AgentTask>, ValidationError> {
        let conn = self.dal.connection().await?;

        let now_ts = now.to_rfc3339();
        let stale_cutoff = (now - lease_timeout).to_rfc3339();
        let rows: Vec<SqliteAgentTask> = conn
            .interact(move |conn| {
                agent_tasks::table
                    .filter(agent_tasks::kind.eq("scheduled"))
                    .filter(agent_tasks::status.eq(TaskStatus::Active.to_string()))
                    .filter(agent_tasks::next_run_at.le(now_ts.clone()))
                    .filter(
                        agent_tasks::claimed_at
                            .is_null()
                            .or(agent_tasks::claimed_at.lt(stale_cutoff)),
                    )
                    .filter(
                        agent_tasks::start_date
                            .is_null()
                            .or(agent_tasks::start_date.le(now_ts.clone())),
                    )
                    .filter(
                        agent_tasks::end_date
                            .is_null()
                            .or(agent_tasks::end_date.ge(now_ts)),
                    )
                    .order(agent_tasks::next_run_at.asc())
                    .load(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Atomically claims a task for dispatch.
    ///
    /// Sets the `claimed_at` lease only if the task is active and unclaimed
    /// (or the existing claim is stale). Returns `false` when another
    /// dispatcher holds the claim.
    pub async fn claim(
        &self,
        id: UniversalUuid,
        now: DateTime<Utc>,
        lease_timeout: Duration,
    ) -> Result<bool, ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let now_ts = now.to_rfc3339();
        let stale_cutoff = (now - lease_timeout).to_rfc3339();
        let updated_rows = conn
            .interact(move |conn| {
                diesel::update(agent_tasks::table.find(id_blob))
                    .filter(agent_tasks::status.eq(TaskStatus::Active.to_string()))
                    .filter(
                        agent_tasks::claimed_at
                            .is_null()
                            .or(agent_tasks::claimed_at.lt(stale_cutoff)),
                    )
                    .set((
                        agent_tasks::claimed_at.eq(Some(now_ts.clone())),
                        agent_tasks::updated_at.eq(now_ts),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(updated_rows == 1)
    }

    /// Releases a task's dispatch claim.
    pub async fn release_claim(&self, id: UniversalUuid) -> Result<(), ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let now_ts = current_timestamp_string();
        conn.interact(move |conn| {
            diesel::update(agent_tasks::table.find(id_blob))
                .set((
                    agent_tasks::claimed_at.eq(None::<String>),
                    agent_tasks::updated_at.eq(now_ts),
                ))
                .execute(conn)
        })
        .await
        .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    /// Clears every outstanding claim. Startup recovery only — in-flight
    /// dispatches from a previous process no longer exist.
    pub async fn clear_all_claims(&self) -> Result<usize, ValidationError> {
        let conn = self.dal.connection().await?;

        let now_ts = current_timestamp_string();
        let cleared = conn
            .interact(move |conn| {
                diesel::update(agent_tasks::table)
                    .filter(agent_tasks::claimed_at.is_not_null())
                    .set((
                        agent_tasks::claimed_at.eq(None::<String>),
                        agent_tasks::updated_at.eq(now_ts),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(cleared)
    }

    /// Applies the mutable-field subset of a task update.
    pub async fn update_details(
        &self,
        id: UniversalUuid,
        update: TaskUpdate,
    ) -> Result<AgentTask, ValidationError> {
        if let Some(cap) = update.max_executions {
            if cap <= 0 {
                return Err(ValidationError::NonPositiveMaxExecutions(cap));
            }
        }
        let current = self.get_by_id(id).await?;
        let start = update.start_date.or(current.start_date);
        let end = update.end_date.or(current.end_date);
        if let (Some(start), Some(end)) = (start, end) {
            if start.0 >= end.0 {
                return Err(ValidationError::InvalidDateRange);
            }
        }

        let allowed_tools = match &update.allowed_tools {
            Some(tools) => Some(serde_json::to_string(tools)?),
            None => None,
        };
        let current_name = current.name;
        let current_instructions = current.instructions;
        let current_tools = serde_json::to_string(&current.allowed_tools)?;
        let current_max_executions = current.max_executions;

        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let now_ts = current_timestamp_string();
        conn.interact(move |conn| {
            // None leaves a field unchanged. Applied as one statement with
            // every field set to its new-or-current value.
            diesel::update(agent_tasks::table.find(id_blob))
                .set((
                    agent_tasks::name.eq(update.name.unwrap_or(current_name)),
                    agent_tasks::instructions
                        .eq(update.instructions.unwrap_or(current_instructions)),
                    agent_tasks::allowed_tools.eq(allowed_tools.unwrap_or(current_tools)),
                    agent_tasks::max_executions
                        .eq(update.max_executions.or(current_max_executions)),
                    agent_tasks::start_date.eq(start.map(|t| t.to_rfc3339())),
                    agent_tasks::end_date.eq(end.map(|t| t.to_rfc3339())),
                    agent_tasks::updated_at.eq(now_ts),
                ))
                .execute(conn)
        })
        .await
        .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;
        drop(conn);

        self.get_by_id(id).await
    }

    /// Replaces a scheduled task's recurrence expression, timezone, and
    /// timing in one statement, used by reschedule.
    pub async fn update_schedule(
        &self,
        id: UniversalUuid,
        cron_expression: String,
        timezone: String,
        next_run_at: UniversalTimestamp,
        end_date: Option<UniversalTimestamp>,
    ) -> Result<(), ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let now_ts = current_timestamp_string();
        conn.interact(move |conn| {
            diesel::update(agent_tasks::table.find(id_blob))
                .set((
                    agent_tasks::cron_expression.eq(Some(cron_expression)),
                    agent_tasks::timezone.eq(Some(timezone)),
                    agent_tasks::next_run_at.eq(Some(next_run_at.to_rfc3339())),
                    agent_tasks::end_date.eq(end_date.map(|t| t.to_rfc3339())),
                    agent_tasks::updated_at.eq(now_ts),
                ))
                .execute(conn)
        })
        .await
        .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    /// Updates a task's next due time.
    pub async fn update_next_run(
        &self,
        id: UniversalUuid,
        next_run_at: UniversalTimestamp,
    ) -> Result<(), ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let now_ts = current_timestamp_string();
        conn.interact(move |conn| {
            diesel::update(agent_tasks::table.find(id_blob))
                .set((
                    agent_tasks::next_run_at.eq(Some(next_run_at.to_rfc3339())),
                    agent_tasks::updated_at.eq(now_ts),
                ))
                .execute(conn)
        })
        .await
        .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    /// Records a successful execution: bumps total/successful counters,
    /// resets the consecutive-failure streak, and stamps `last_run_at`.
    /// Returns the task as stored after the update.
    pub async fn record_success(
        &self,
        id: UniversalUuid,
        last_run_at: UniversalTimestamp,
    ) -> Result<AgentTask, ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let now_ts = current_timestamp_string();
        conn.interact(move |conn| {
            diesel::update(agent_tasks::table.find(id_blob))
                .set((
                    agent_tasks::total_executions.eq(agent_tasks::total_executions + 1),
                    agent_tasks::successful_executions.eq(agent_tasks::successful_executions + 1),
                    agent_tasks::consecutive_failures.eq(0),
                    agent_tasks::last_run_at.eq(Some(last_run_at.to_rfc3339())),
                    agent_tasks::updated_at.eq(now_ts),
                ))
                .execute(conn)
        })
        .await
        .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;
        drop(conn);

        self.get_by_id(id).await
    }

    /// Records a failed execution: bumps total/failed counters and the
    /// consecutive-failure streak. `next_run_at` is deliberately untouched so
    /// the task retries on its normal cadence.
    pub async fn record_failure(
        &self,
        id: UniversalUuid,
        last_run_at: UniversalTimestamp,
    ) -> Result<AgentTask, ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let now_ts = current_timestamp_string();
        conn.interact(move |conn| {
            diesel::update(agent_tasks::table.find(id_blob))
                .set((
                    agent_tasks::total_executions.eq(agent_tasks::total_executions + 1),
                    agent_tasks::failed_executions.eq(agent_tasks::failed_executions + 1),
                    agent_tasks::consecutive_failures.eq(agent_tasks::consecutive_failures + 1),
                    agent_tasks::last_run_at.eq(Some(last_run_at.to_rfc3339())),
                    agent_tasks::updated_at.eq(now_ts),
                ))
                .execute(conn)
        })
        .await
        .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;
        drop(conn);

        self.get_by_id(id).await
    }

    /// Conditionally transitions a task's status, returning whether the row
    /// was in `from` when the update landed.
    pub async fn try_transition(
        &self,
        id: UniversalUuid,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<bool, ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let now_ts = current_timestamp_string();
        let updated_rows = conn
            .interact(move |conn| {
                diesel::update(agent_tasks::table.find(id_blob))
                    .filter(agent_tasks::status.eq(from.to_string()))
                    .set((
                        agent_tasks::status.eq(to.to_string()),
                        agent_tasks::updated_at.eq(now_ts),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(updated_rows == 1)
    }

    /// Moves an active task to `completed` once its execution cap is
    /// reached. Returns whether the transition fired.
    pub async fn complete_if_capped(&self, id: UniversalUuid) -> Result<bool, ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let now_ts = current_timestamp_string();
        let updated_rows = conn
            .interact(move |conn| {
                diesel::update(agent_tasks::table.find(id_blob))
                    .filter(agent_tasks::status.eq(TaskStatus::Active.to_string()))
                    .filter(agent_tasks::max_executions.is_not_null())
                    .filter(
                        agent_tasks::total_executions
                            .nullable()
                            .ge(agent_tasks::max_executions),
                    )
                    .set((
                        agent_tasks::status.eq(TaskStatus::Completed.to_string()),
                        agent_tasks::updated_at.eq(now_ts),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(updated_rows == 1)
    }

    /// Moves an active task to `failed` once its consecutive-failure streak
    /// reaches `limit`. Returns whether the transition fired.
    pub async fn fail_if_over_limit(
        &self,
        id: UniversalUuid,
        limit: i32,
    ) -> Result<bool, ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let now_ts = current_timestamp_string();
        let updated_rows = conn
            .interact(move |conn| {
                diesel::update(agent_tasks::table.find(id_blob))
                    .filter(agent_tasks::status.eq(TaskStatus::Active.to_string()))
                    .filter(agent_tasks::consecutive_failures.ge(limit))
                    .set((
                        agent_tasks::status.eq(TaskStatus::Failed.to_string()),
                        agent_tasks::updated_at.eq(now_ts),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(updated_rows == 1)
    }

    /// Deletes a task; executions and triggers cascade.
    pub async fn delete(&self, id: UniversalUuid) -> Result<(), ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        conn.interact(move |conn| diesel::delete(agent_tasks::table.find(id_blob)).execute(conn))
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(())
    }
}
