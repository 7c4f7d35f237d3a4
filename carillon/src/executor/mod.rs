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

//! Task Execution
//!
//! The dispatch side of the engine: the [`AgentInvoker`] trait is the seam
//! where the host application plugs in its agent runtime, and the
//! [`ExecutionRunner`] drives one execution through the claim, ledger, and
//! bookkeeping protocol.

pub mod invoker;
pub mod runner;

pub use invoker::{AgentInvoker, InvocationRequest, InvocationResult};
pub use runner::ExecutionRunner;
