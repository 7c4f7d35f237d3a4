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

//! Event Triggers
//!
//! The event side of the engine: [`AgentEvent`] is the inbound envelope,
//! [`TriggerCondition`] the strongly-typed match rules stored per trigger,
//! and [`TriggerEngine`] the evaluator that turns matching events into task
//! executions.

pub mod condition;
pub mod engine;
pub mod event;

pub use condition::TriggerCondition;
pub use engine::{EventOutcome, TriggerEngine};
pub use event::{AgentEvent, TriggerType};
