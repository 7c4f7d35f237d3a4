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

//! Trigger conditions: a tagged union keyed by trigger type.
//!
//! Each variant carries its own condition schema and knows how to evaluate
//! itself against an event payload. Empty optional fields match everything of
//! their kind, so a freshly created trigger with default conditions fires on
//! every event of its type. Serialized as tagged JSON in the `conditions`
//! column.

use serde::{Deserialize, Serialize};

use crate::trigger::event::{AgentEvent, TriggerType};

/// Condition set evaluated against inbound events, one variant per trigger
/// type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerCondition {
    /// Matches inbound messages on channel, sender, and keyword content.
    InboundMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_contains: Option<String>,
        /// Any-of match over the message text; empty matches everything
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        keywords: Vec<String>,
    },
    /// Matches webhooks on their source system and event name.
    Webhook {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_name: Option<String>,
    },
    /// Matches when the event reports at least this much idle time.
    TimeWindow { min_idle_minutes: i64 },
    /// Explicit fire requests; always matches.
    Manual,
    /// Matches agent mentions, optionally restricted to one workspace.
    AgentMentioned {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace: Option<String>,
    },
    /// Matches file uploads on extension and path prefix.
    FileUploaded {
        /// Any-of match on the file extension; empty matches everything
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        extensions: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path_prefix: Option<String>,
    },
    /// Matches workspace messages on workspace, channel, and keywords.
    WorkspaceMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        keywords: Vec<String>,
    },
}

impl TriggerCondition {
    /// The match-everything condition for a trigger type.
    pub fn default_for(trigger_type: TriggerType) -> Self {
        match trigger_type {
            TriggerType::InboundMessageReceived => TriggerCondition::InboundMessage {
                channel: None,
                sender_contains: None,
                keywords: Vec::new(),
            },
            TriggerType::WebhookReceived => TriggerCondition::Webhook {
                source: None,
                event_name: None,
            },
            TriggerType::TimeWindowElapsed => TriggerCondition::TimeWindow { min_idle_minutes: 0 },
            TriggerType::Manual => TriggerCondition::Manual,
            TriggerType::AgentMentioned => TriggerCondition::AgentMentioned { workspace: None },
            TriggerType::FileUploaded => TriggerCondition::FileUploaded {
                extensions: Vec::new(),
                path_prefix: None,
            },
            TriggerType::WorkspaceMessagePosted => TriggerCondition::WorkspaceMessage {
                workspace: None,
                channel: None,
                keywords: Vec::new(),
            },
        }
    }

    /// The trigger type this condition belongs to.
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerCondition::InboundMessage { .. } => TriggerType::InboundMessageReceived,
            TriggerCondition::Webhook { .. } => TriggerType::WebhookReceived,
            TriggerCondition::TimeWindow { .. } => TriggerType::TimeWindowElapsed,
            TriggerCondition::Manual => TriggerType::Manual,
            TriggerCondition::AgentMentioned { .. } => TriggerType::AgentMentioned,
            TriggerCondition::FileUploaded { .. } => TriggerType::FileUploaded,
            TriggerCondition::WorkspaceMessage { .. } => TriggerType::WorkspaceMessagePosted,
        }
    }

    /// Evaluates the condition against an event payload.
    ///
    /// Events of a different trigger type never match, regardless of payload.
    pub fn matches(&self, event: &AgentEvent) -> bool {
        if event.trigger_type != self.trigger_type() {
            return false;
        }
        let payload = &event.payload;

        match self {
            TriggerCondition::InboundMessage {
                channel,
                sender_contains,
                keywords,
            } => {
                field_equals(payload, "channel", channel)
                    && field_contains(payload, "sender", sender_contains)
                    && any_keyword(payload, "text", keywords)
            }
            TriggerCondition::Webhook { source, event_name } => {
                field_equals(payload, "source", source)
                    && field_equals(payload, "event", event_name)
            }
            TriggerCondition::TimeWindow { min_idle_minutes } => payload
                .get("idle_minutes")
                .and_then(|v| v.as_i64())
                .map(|idle| idle >= *min_idle_minutes)
                .unwrap_or(false),
            TriggerCondition::Manual => true,
            TriggerCondition::AgentMentioned { workspace } => {
                field_equals(payload, "workspace", workspace)
            }
            TriggerCondition::FileUploaded {
                extensions,
                path_prefix,
            } => {
                let extension_ok = extensions.is_empty()
                    || payload
                        .get("filename")
                        .and_then(|v| v.as_str())
                        .map(|name| {
                            extensions.iter().any(|ext| {
                                name.to_lowercase()
                                    .ends_with(&format!(".{}", ext.to_lowercase()))
                            })
                        })
                        .unwrap_or(false);
                let prefix_ok = match path_prefix {
                    Some(prefix) => payload
                        .get("path")
                        .and_then(|v| v.as_str())
                        .map(|path| path.starts_with(prefix.as_str()))
                        .unwrap_or(false),
                    None => true,
                };
                extension_ok && prefix_ok
            }
            TriggerCondition::WorkspaceMessage {
                workspace,
                channel,
                keywords,
            } => {
                field_equals(payload, "workspace", workspace)
                    && field_equals(payload, "channel", channel)
                    && any_keyword(payload, "text", keywords)
            }
        }
    }
}

/// Equality against a payload string field; `None` matches everything,
/// a set filter against a missing field matches nothing.
fn field_equals(payload: &serde_json::Value, key: &str, expected: &Option<String>) -> bool {
    match expected {
        Some(expected) => payload
            .get(key)
            .and_then(|v| v.as_str())
            .map(|actual| actual == expected)
            .unwrap_or(false),
        None => true,
    }
}

/// Case-insensitive substring match against a payload string field.
fn field_contains(payload: &serde_json::Value, key: &str, needle: &Option<String>) -> bool {
    match needle {
        Some(needle) => payload
            .get(key)
            .and_then(|v| v.as_str())
            .map(|actual| actual.to_lowercase().contains(&needle.to_lowercase()))
            .unwrap_or(false),
        None => true,
    }
}

/// Any-of keyword match over a payload text field; an empty list matches
/// everything.
fn any_keyword(payload: &serde_json::Value, key: &str, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(|text| {
            let text = text.to_lowercase();
            keywords
                .iter()
                .any(|keyword| text.contains(&keyword.to_lowercase()))
        })
        .unwrap_or(false)
}
