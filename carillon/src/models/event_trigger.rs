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

//! Event Trigger Model
//!
//! A trigger is a named, independently toggleable condition set attached to
//! an event-based task. Triggers are never auto-deleted — deactivation is the
//! off switch — and every successful fire advances `last_triggered_at` and
//! `trigger_count` under the cooldown gate.

use serde::{Deserialize, Serialize};

use crate::database::universal_types::{UniversalBool, UniversalTimestamp, UniversalUuid};
use crate::error::ValidationError;
use crate::trigger::condition::TriggerCondition;
use crate::trigger::event::TriggerType;

/// Represents an event trigger record (domain type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTrigger {
    pub id: UniversalUuid,
    /// Parent event-based task
    pub task_id: UniversalUuid,
    pub trigger_type: TriggerType,
    /// Human-facing label shown in trigger listings
    pub label: String,
    /// Strongly-typed condition set evaluated against inbound events
    pub conditions: TriggerCondition,
    pub active: UniversalBool,
    /// Minimum minutes between two fires; zero disables suppression
    pub cooldown_minutes: i32,
    pub last_triggered_at: Option<UniversalTimestamp>,
    pub trigger_count: i32,
    pub created_at: UniversalTimestamp,
    pub updated_at: UniversalTimestamp,
}

impl EventTrigger {
    /// The earliest instant the trigger may fire again, given the cooldown.
    ///
    /// `None` means it may fire immediately (never fired, or no cooldown).
    pub fn next_allowed_fire(&self) -> Option<UniversalTimestamp> {
        let last = self.last_triggered_at?;
        if self.cooldown_minutes == 0 {
            return None;
        }
        Some(UniversalTimestamp(
            last.0 + chrono::Duration::minutes(self.cooldown_minutes as i64),
        ))
    }
}

/// Structure for creating new event triggers (domain type).
#[derive(Debug, Clone)]
pub struct NewEventTrigger {
    pub task_id: UniversalUuid,
    pub trigger_type: TriggerType,
    pub label: String,
    pub conditions: TriggerCondition,
    pub active: bool,
    pub cooldown_minutes: i32,
}

impl NewEventTrigger {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.cooldown_minutes < 0 {
            return Err(ValidationError::NegativeCooldown(self.cooldown_minutes));
        }
        Ok(())
    }
}
