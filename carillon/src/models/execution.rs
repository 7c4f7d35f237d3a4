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

//! Task Execution Model
//!
//! This module defines the domain structures for the execution ledger: one
//! row per attempt to run a task, carrying a frozen snapshot of the
//! instructions and tool allow-list so later task edits never rewrite
//! history. Rows are append-only — once an execution reaches a terminal
//! status it is never edited; corrections happen via new executions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};

/// Status of a single execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Ledger row written, collaborator not yet invoked.
    Pending,
    /// Collaborator invocation in flight.
    Running,
    /// Collaborator returned successfully.
    Completed,
    /// Collaborator failed, timed out, or the process died mid-run.
    Failed,
    /// Explicitly cancelled while pending or running.
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("Unknown execution status: {}", other)),
        }
    }
}

/// Provenance of an execution: which path dispatched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// The poll loop found the task due.
    Scheduled,
    /// An event trigger matched and fired.
    Event,
    /// An explicit run-now request.
    Manual,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerSource::Scheduled => "scheduled",
            TriggerSource::Event => "event",
            TriggerSource::Manual => "manual",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TriggerSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(TriggerSource::Scheduled),
            "event" => Ok(TriggerSource::Event),
            "manual" => Ok(TriggerSource::Manual),
            other => Err(format!("Unknown trigger source: {}", other)),
        }
    }
}

/// Represents one ledger entry: a single attempt to run a task (domain type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    /// Unique identifier for the execution
    pub id: UniversalUuid,
    /// The task this execution belongs to
    pub task_id: UniversalUuid,
    /// The agent that ran (or would have run) the task
    pub agent_id: UniversalUuid,
    /// Current status of the attempt
    pub status: ExecutionStatus,
    /// Which path dispatched this execution
    pub trigger_source: TriggerSource,
    /// Opaque payload from the firing event, if any
    pub trigger_payload: Option<serde_json::Value>,
    /// Frozen copy of the task instructions at dispatch time
    pub instructions: String,
    /// Frozen copy of the tool allow-list at dispatch time
    pub allowed_tools: Vec<String>,
    /// When the collaborator invocation began
    pub started_at: Option<UniversalTimestamp>,
    /// When the attempt reached a terminal status
    pub completed_at: Option<UniversalTimestamp>,
    /// Wall-clock duration of the collaborator call, in milliseconds
    pub duration_ms: Option<i64>,
    /// Collaborator output text on success
    pub output: Option<String>,
    /// Structured per-tool outputs reported by the collaborator
    pub tool_outputs: Option<serde_json::Value>,
    /// Error detail on failure or cancellation
    pub error_message: Option<String>,
    /// Free-form metadata attached by the dispatcher
    pub metadata: Option<serde_json::Value>,
    /// When the ledger row was created
    pub created_at: UniversalTimestamp,
    /// When the ledger row was last updated
    pub updated_at: UniversalTimestamp,
}

/// Structure for creating new ledger entries (domain type).
///
/// Executions are always created `pending`; the id and timestamps are set by
/// the DAL.
#[derive(Debug, Clone)]
pub struct NewTaskExecution {
    pub task_id: UniversalUuid,
    pub agent_id: UniversalUuid,
    pub trigger_source: TriggerSource,
    pub trigger_payload: Option<serde_json::Value>,
    pub instructions: String,
    pub allowed_tools: Vec<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Aggregate execution counts for one task, for audit/UI display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    /// Average wall-clock duration over completed executions.
    pub average_duration_ms: Option<f64>,
}
