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

//! Event Trigger DAL
//!
//! Storage operations for trigger records. The cooldown gate lives here:
//! [`EventTriggerDAL::claim_fire`] advances `last_triggered_at` and the fire
//! count in one conditional UPDATE keyed on the previously observed fire
//! time, so two concurrent events inside a cooldown window cannot both win.

use diesel::prelude::*;

use super::models::{
    current_timestamp_string, uuid_to_blob, NewSqliteEventTrigger, SqliteEventTrigger,
};
use super::DAL;
use crate::database::schema::{agent_tasks, event_triggers};
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::ValidationError;
use crate::models::event_trigger::{EventTrigger, NewEventTrigger};
use crate::models::task::TaskStatus;
use crate::trigger::event::TriggerType;

/// Data access layer for event trigger operations.
#[derive(Clone)]
pub struct EventTriggerDAL<'a> {
    dal: &'a DAL,
}

impl<'a> EventTriggerDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Validates and inserts a new trigger.
    ///
    /// The parent task must be event-based with the same trigger type; the
    /// condition variant must also agree with the declared type.
    pub async fn create(
        &self,
        new_trigger: NewEventTrigger,
    ) -> Result<EventTrigger, ValidationError> {
        new_trigger.validate()?;

        let task = self.dal.agent_tasks().get_by_id(new_trigger.task_id).await?;
        let task_trigger_type =
            task.trigger_type
                .ok_or_else(|| ValidationError::TriggerTypeMismatch {
                    trigger: new_trigger.trigger_type.to_string(),
                    task: "none".to_string(),
                })?;
        if task_trigger_type != new_trigger.trigger_type
            || new_trigger.conditions.trigger_type() != new_trigger.trigger_type
        {
            return Err(ValidationError::TriggerTypeMismatch {
                trigger: new_trigger.trigger_type.to_string(),
                task: task_trigger_type.to_string(),
            });
        }

        let conn = self.dal.connection().await?;

        let id = UniversalUuid::new_v4();
        let id_blob = uuid_to_blob(&id.0);
        let now = current_timestamp_string();

        let row = NewSqliteEventTrigger {
            id: id_blob,
            task_id: uuid_to_blob(&new_trigger.task_id.0),
            trigger_type: new_trigger.trigger_type.to_string(),
            label: new_trigger.label,
            conditions: serde_json::to_string(&new_trigger.conditions)?,
            active: if new_trigger.active { 1 } else { 0 },
            cooldown_minutes: new_trigger.cooldown_minutes,
            created_at: now.clone(),
            updated_at: now,
        };

        conn.interact(move |conn| {
            diesel::insert_into(event_triggers::table)
                .values(&row)
                .execute(conn)
        })
        .await
        .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;
        drop(conn);

        self.get_by_id(id).await
    }

    /// Retrieves a trigger by its ID.
    pub async fn get_by_id(&self, id: UniversalUuid) -> Result<EventTrigger, ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let row: Option<SqliteEventTrigger> = conn
            .interact(move |conn| event_triggers::table.find(id_blob).first(conn).optional())
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        row.map(Into::into)
            .ok_or(ValidationError::TriggerNotFound(id))
    }

    /// Lists a task's triggers, oldest first.
    pub async fn list_by_task(
        &self,
        task_id: UniversalUuid,
    ) -> Result<Vec<EventTrigger>, ValidationError> {
        let conn = self.dal.connection().await?;

        let task_blob = uuid_to_blob(&task_id.0);
        let rows: Vec<SqliteEventTrigger> = conn
            .interact(move |conn| {
                event_triggers::table
                    .filter(event_triggers::task_id.eq(task_blob))
                    .order(event_triggers::created_at.asc())
                    .load(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Retrieves active triggers of one type whose parent task is active,
    /// optionally restricted to one agent's tasks. This is the candidate set
    /// the trigger engine evaluates for each inbound event.
    pub async fn get_active_for_type(
        &self,
        trigger_type: TriggerType,
        agent_id: Option<UniversalUuid>,
    ) -> Result<Vec<EventTrigger>, ValidationError> {
        let conn = self.dal.connection().await?;

        let type_tag = trigger_type.to_string();
        let agent_blob = agent_id.map(|id| uuid_to_blob(&id.0));
        let rows: Vec<SqliteEventTrigger> = conn
            .interact(move |conn| {
                let mut query = event_triggers::table
                    .inner_join(agent_tasks::table)
                    .filter(event_triggers::trigger_type.eq(type_tag))
                    .filter(event_triggers::active.eq(1))
                    .filter(agent_tasks::status.eq(TaskStatus::Active.to_string()))
                    .select(SqliteEventTrigger::as_select())
                    .into_boxed();

                if let Some(agent_blob) = agent_blob {
                    query = query.filter(agent_tasks::agent_id.eq(agent_blob));
                }

                query
                    .order(event_triggers::created_at.asc())
                    .load(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Toggles a trigger's active flag.
    pub async fn set_active(
        &self,
        id: UniversalUuid,
        active: bool,
    ) -> Result<(), ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let now_ts = current_timestamp_string();
        conn.interact(move |conn| {
            diesel::update(event_triggers::table.find(id_blob))
                .set((
                    event_triggers::active.eq(if active { 1 } else { 0 }),
                    event_triggers::updated_at.eq(now_ts),
                ))
                .execute(conn)
        })
        .await
        .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    /// Atomically claims a fire for a trigger.
    ///
    /// The update lands only if the trigger is still active and
    /// `last_triggered_at` still holds the value the caller observed when it
    /// passed the cooldown check; a concurrent fire changes that value and
    /// makes this a no-op. Returns whether the fire was claimed.
    pub async fn claim_fire(
        &self,
        id: UniversalUuid,
        observed_last: Option<UniversalTimestamp>,
        fired_at: UniversalTimestamp,
    ) -> Result<bool, ValidationError> {
        let conn = self.dal.connection().await?;

        let id_blob = uuid_to_blob(&id.0);
        let fired_ts = fired_at.to_rfc3339();
        let now_ts = current_timestamp_string();
        let observed_ts = observed_last.map(|t| t.to_rfc3339());
        let updated_rows = conn
            .interact(move |conn| {
                let query = diesel::update(event_triggers::table.find(id_blob))
                    .filter(event_triggers::active.eq(1));
                let set = (
                    event_triggers::last_triggered_at.eq(Some(fired_ts)),
                    event_triggers::trigger_count.eq(event_triggers::trigger_count + 1),
                    event_triggers::updated_at.eq(now_ts),
                );

                match observed_ts {
                    Some(observed) => query
                        .filter(event_triggers::last_triggered_at.eq(observed))
                        .set(set)
                        .execute(conn),
                    None => query
                        .filter(event_triggers::last_triggered_at.is_null())
                        .set(set)
                        .execute(conn),
                }
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(updated_rows == 1)
    }
}
