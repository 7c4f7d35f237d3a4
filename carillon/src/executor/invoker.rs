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

//! Agent Invocation Interface
//!
//! The engine never runs agent work itself; it hands a fully-resolved
//! [`InvocationRequest`] to an [`AgentInvoker`] supplied by the host
//! application and records whatever comes back. Implementations typically
//! call out to an agent runtime or an LLM-backed worker; tests plug in a
//! programmable mock.

use async_trait::async_trait;

use crate::database::universal_types::UniversalUuid;
use crate::error::InvocationError;
use crate::models::execution::TriggerSource;

/// Everything the collaborator needs to run one execution.
///
/// The instructions and tool allow-list are the frozen snapshot from the
/// ledger row, not a live read of the task.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// The agent that owns the task
    pub agent_id: UniversalUuid,
    /// The task being run
    pub task_id: UniversalUuid,
    /// The ledger row this invocation reports into
    pub execution_id: UniversalUuid,
    /// Frozen instructions snapshot
    pub instructions: String,
    /// Frozen tool allow-list snapshot
    pub allowed_tools: Vec<String>,
    /// Which path dispatched this execution
    pub trigger_source: TriggerSource,
    /// Opaque payload from the firing event, if any
    pub trigger_payload: Option<serde_json::Value>,
}

/// A successful collaborator result, written onto the ledger row verbatim.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    /// Agent output text
    pub output: String,
    /// Structured per-tool outputs, if the collaborator reports them
    pub tool_outputs: Vec<serde_json::Value>,
    /// Wall-clock duration as measured by the collaborator, in milliseconds
    pub duration_ms: i64,
}

/// The collaborator that actually runs agent work.
///
/// Implementations must be safe to call concurrently; the engine dispatches
/// up to its configured concurrency limit in parallel. Errors returned here
/// are recorded on the execution row and never propagate past the runner.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResult, InvocationError>;
}
