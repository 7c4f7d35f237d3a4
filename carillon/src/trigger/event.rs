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

//! Event types consumed by the trigger engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::database::universal_types::UniversalUuid;

/// The closed set of trigger types an event-based task can listen for.
///
/// Persisted as the kebab-case tag on both tasks and triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerType {
    InboundMessageReceived,
    WebhookReceived,
    TimeWindowElapsed,
    Manual,
    AgentMentioned,
    FileUploaded,
    WorkspaceMessagePosted,
}

impl TriggerType {
    pub const ALL: [TriggerType; 7] = [
        TriggerType::InboundMessageReceived,
        TriggerType::WebhookReceived,
        TriggerType::TimeWindowElapsed,
        TriggerType::Manual,
        TriggerType::AgentMentioned,
        TriggerType::FileUploaded,
        TriggerType::WorkspaceMessagePosted,
    ];
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerType::InboundMessageReceived => "inbound-message-received",
            TriggerType::WebhookReceived => "webhook-received",
            TriggerType::TimeWindowElapsed => "time-window-elapsed",
            TriggerType::Manual => "manual",
            TriggerType::AgentMentioned => "agent-mentioned",
            TriggerType::FileUploaded => "file-uploaded",
            TriggerType::WorkspaceMessagePosted => "workspace-message-posted",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound-message-received" => Ok(TriggerType::InboundMessageReceived),
            "webhook-received" => Ok(TriggerType::WebhookReceived),
            "time-window-elapsed" => Ok(TriggerType::TimeWindowElapsed),
            "manual" => Ok(TriggerType::Manual),
            "agent-mentioned" => Ok(TriggerType::AgentMentioned),
            "file-uploaded" => Ok(TriggerType::FileUploaded),
            "workspace-message-posted" => Ok(TriggerType::WorkspaceMessagePosted),
            other => Err(format!("Unknown trigger type: {}", other)),
        }
    }
}

/// A typed event delivered by an upstream system.
///
/// The payload is opaque to the engine except for the fields the matching
/// trigger conditions inspect; the whole payload is frozen onto any execution
/// the event fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub trigger_type: TriggerType,
    /// Upstream-defined payload; condition matching reads well-known keys
    /// from it
    pub payload: serde_json::Value,
    /// When the upstream system observed the event
    pub occurred_at: DateTime<Utc>,
    /// Restrict matching to tasks owned by this agent, when set
    pub agent_id: Option<UniversalUuid>,
}

impl AgentEvent {
    pub fn new(trigger_type: TriggerType, payload: serde_json::Value) -> Self {
        Self {
            trigger_type,
            payload,
            occurred_at: Utc::now(),
            agent_id: None,
        }
    }

    pub fn for_agent(mut self, agent_id: UniversalUuid) -> Self {
        self.agent_id = Some(agent_id);
        self
    }
}
