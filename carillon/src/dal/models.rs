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

//! SQLite row models.
//!
//! Diesel model definitions using SQLite-compatible types: UUIDs as BLOB
//! (`Vec<u8>`), timestamps as RFC3339 TEXT, booleans and enums as
//! INTEGER/TEXT, JSON columns as TEXT. These are used internally by the DALs
//! and converted to/from domain types at the DAL boundary. A row that fails
//! conversion is corrupt data, treated as fatal.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::database::schema::{agent_tasks, event_triggers, task_executions};
use crate::database::universal_types::{UniversalBool, UniversalTimestamp, UniversalUuid};
use crate::models::event_trigger::EventTrigger;
use crate::models::execution::TaskExecution;
use crate::models::task::AgentTask;
use crate::trigger::condition::TriggerCondition;

pub fn uuid_to_blob(uuid: &Uuid) -> Vec<u8> {
    uuid.as_bytes().to_vec()
}

pub fn blob_to_uuid(blob: &[u8]) -> Result<Uuid, uuid::Error> {
    Uuid::from_slice(blob)
}

pub fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

pub fn current_timestamp_string() -> String {
    Utc::now().to_rfc3339()
}

fn timestamp(s: &str) -> UniversalTimestamp {
    UniversalTimestamp(string_to_datetime(s).expect("Invalid timestamp in database"))
}

fn optional_timestamp(s: Option<String>) -> Option<UniversalTimestamp> {
    s.map(|ts| timestamp(&ts))
}

fn uuid(blob: &[u8]) -> UniversalUuid {
    UniversalUuid(blob_to_uuid(blob).expect("Invalid UUID in database"))
}

fn tool_list(json: &str) -> Vec<String> {
    serde_json::from_str(json).expect("Invalid tool list in database")
}

fn optional_json(s: Option<String>) -> Option<serde_json::Value> {
    s.map(|json| serde_json::from_str(&json).expect("Invalid JSON in database"))
}

// ============================================================================
// Agent Task Models
// ============================================================================

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = agent_tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteAgentTask {
    pub id: Vec<u8>,
    pub agent_id: Vec<u8>,
    pub principal_id: Vec<u8>,
    pub name: String,
    pub kind: String,
    pub instructions: String,
    pub allowed_tools: String,
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub next_run_at: Option<String>,
    pub last_run_at: Option<String>,
    pub trigger_type: Option<String>,
    pub total_executions: i32,
    pub successful_executions: i32,
    pub failed_executions: i32,
    pub consecutive_failures: i32,
    pub max_executions: Option<i32>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: String,
    pub claimed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = agent_tasks)]
pub struct NewSqliteAgentTask {
    pub id: Vec<u8>,
    pub agent_id: Vec<u8>,
    pub principal_id: Vec<u8>,
    pub name: String,
    pub kind: String,
    pub instructions: String,
    pub allowed_tools: String,
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub next_run_at: Option<String>,
    pub trigger_type: Option<String>,
    pub max_executions: Option<i32>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<SqliteAgentTask> for AgentTask {
    fn from(t: SqliteAgentTask) -> Self {
        AgentTask {
            id: uuid(&t.id),
            agent_id: uuid(&t.agent_id),
            principal_id: uuid(&t.principal_id),
            name: t.name,
            kind: t.kind.parse().expect("Invalid task kind in database"),
            instructions: t.instructions,
            allowed_tools: tool_list(&t.allowed_tools),
            cron_expression: t.cron_expression,
            timezone: t.timezone,
            next_run_at: optional_timestamp(t.next_run_at),
            last_run_at: optional_timestamp(t.last_run_at),
            trigger_type: t
                .trigger_type
                .map(|tt| tt.parse().expect("Invalid trigger type in database")),
            total_executions: t.total_executions,
            successful_executions: t.successful_executions,
            failed_executions: t.failed_executions,
            consecutive_failures: t.consecutive_failures,
            max_executions: t.max_executions,
            start_date: optional_timestamp(t.start_date),
            end_date: optional_timestamp(t.end_date),
            status: t.status.parse().expect("Invalid task status in database"),
            claimed_at: optional_timestamp(t.claimed_at),
            created_at: timestamp(&t.created_at),
            updated_at: timestamp(&t.updated_at),
        }
    }
}

// ============================================================================
// Task Execution Models
// ============================================================================

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = task_executions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteTaskExecution {
    pub id: Vec<u8>,
    pub task_id: Vec<u8>,
    pub agent_id: Vec<u8>,
    pub status: String,
    pub trigger_source: String,
    pub trigger_payload: Option<String>,
    pub instructions: String,
    pub allowed_tools: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub output: Option<String>,
    pub tool_outputs: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = task_executions)]
pub struct NewSqliteTaskExecution {
    pub id: Vec<u8>,
    pub task_id: Vec<u8>,
    pub agent_id: Vec<u8>,
    pub status: String,
    pub trigger_source: String,
    pub trigger_payload: Option<String>,
    pub instructions: String,
    pub allowed_tools: String,
    pub metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<SqliteTaskExecution> for TaskExecution {
    fn from(e: SqliteTaskExecution) -> Self {
        TaskExecution {
            id: uuid(&e.id),
            task_id: uuid(&e.task_id),
            agent_id: uuid(&e.agent_id),
            status: e
                .status
                .parse()
                .expect("Invalid execution status in database"),
            trigger_source: e
                .trigger_source
                .parse()
                .expect("Invalid trigger source in database"),
            trigger_payload: optional_json(e.trigger_payload),
            instructions: e.instructions,
            allowed_tools: tool_list(&e.allowed_tools),
            started_at: optional_timestamp(e.started_at),
            completed_at: optional_timestamp(e.completed_at),
            duration_ms: e.duration_ms,
            output: e.output,
            tool_outputs: optional_json(e.tool_outputs),
            error_message: e.error_message,
            metadata: optional_json(e.metadata),
            created_at: timestamp(&e.created_at),
            updated_at: timestamp(&e.updated_at),
        }
    }
}

// ============================================================================
// Event Trigger Models
// ============================================================================

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = event_triggers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteEventTrigger {
    pub id: Vec<u8>,
    pub task_id: Vec<u8>,
    pub trigger_type: String,
    pub label: String,
    pub conditions: String,
    pub active: i32,
    pub cooldown_minutes: i32,
    pub last_triggered_at: Option<String>,
    pub trigger_count: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = event_triggers)]
pub struct NewSqliteEventTrigger {
    pub id: Vec<u8>,
    pub task_id: Vec<u8>,
    pub trigger_type: String,
    pub label: String,
    pub conditions: String,
    pub active: i32,
    pub cooldown_minutes: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl From<SqliteEventTrigger> for EventTrigger {
    fn from(t: SqliteEventTrigger) -> Self {
        let conditions: TriggerCondition =
            serde_json::from_str(&t.conditions).expect("Invalid trigger conditions in database");
        EventTrigger {
            id: uuid(&t.id),
            task_id: uuid(&t.task_id),
            trigger_type: t
                .trigger_type
                .parse()
                .expect("Invalid trigger type in database"),
            label: t.label,
            conditions,
            active: UniversalBool::from_i32(t.active),
            cooldown_minutes: t.cooldown_minutes,
            last_triggered_at: optional_timestamp(t.last_triggered_at),
            trigger_count: t.trigger_count,
            created_at: timestamp(&t.created_at),
            updated_at: timestamp(&t.updated_at),
        }
    }
}
