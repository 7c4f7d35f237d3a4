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

//! Diesel schema for the engine's three tables.
//!
//! Matches the embedded migrations: UUIDs as BLOB (`Binary`), timestamps as
//! RFC3339 TEXT, booleans as INTEGER.

diesel::table! {
    agent_tasks (id) {
        id -> Binary,
        agent_id -> Binary,
        principal_id -> Binary,
        name -> Text,
        kind -> Text,
        instructions -> Text,
        allowed_tools -> Text,
        cron_expression -> Nullable<Text>,
        timezone -> Nullable<Text>,
        next_run_at -> Nullable<Text>,
        last_run_at -> Nullable<Text>,
        trigger_type -> Nullable<Text>,
        total_executions -> Integer,
        successful_executions -> Integer,
        failed_executions -> Integer,
        consecutive_failures -> Integer,
        max_executions -> Nullable<Integer>,
        start_date -> Nullable<Text>,
        end_date -> Nullable<Text>,
        status -> Text,
        claimed_at -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    task_executions (id) {
        id -> Binary,
        task_id -> Binary,
        agent_id -> Binary,
        status -> Text,
        trigger_source -> Text,
        trigger_payload -> Nullable<Text>,
        instructions -> Text,
        allowed_tools -> Text,
        started_at -> Nullable<Text>,
        completed_at -> Nullable<Text>,
        duration_ms -> Nullable<BigInt>,
        output -> Nullable<Text>,
        tool_outputs -> Nullable<Text>,
        error_message -> Nullable<Text>,
        metadata -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    event_triggers (id) {
        id -> Binary,
        task_id -> Binary,
        trigger_type -> Text,
        label -> Text,
        conditions -> Text,
        active -> Integer,
        cooldown_minutes -> Integer,
        last_triggered_at -> Nullable<Text>,
        trigger_count -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::joinable!(task_executions -> agent_tasks (task_id));
diesel::joinable!(event_triggers -> agent_tasks (task_id));

diesel::allow_tables_to_appear_in_same_query!(agent_tasks, task_executions, event_triggers);
