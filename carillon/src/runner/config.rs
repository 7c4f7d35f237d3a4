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

//! Engine Configuration
//!
//! Tunables for the task engine, with defaults suitable for an embedded
//! deployment. Use [`EngineConfig::builder`] to override individual values;
//! the builder validates on `build()` so a misconfigured engine never starts.

use std::time::Duration;

use crate::error::EngineError;

/// Configuration for a [`crate::TaskEngine`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct EngineConfig {
    max_concurrent_executions: usize,
    poll_interval: Duration,
    execution_timeout: Duration,
    claim_lease_timeout: Duration,
    consecutive_failure_limit: Option<u32>,
    enable_polling: bool,
    enable_recovery: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 4,
            poll_interval: Duration::from_secs(30),
            execution_timeout: Duration::from_secs(300),
            claim_lease_timeout: Duration::from_secs(600),
            consecutive_failure_limit: Some(5),
            enable_polling: true,
            enable_recovery: true,
        }
    }
}

impl EngineConfig {
    /// Creates a builder initialized with the defaults.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Maximum executions in flight at once across all dispatch paths.
    pub fn max_concurrent_executions(&self) -> usize {
        self.max_concurrent_executions
    }

    /// How often the scheduler checks for due tasks.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wall-clock cap on a single collaborator invocation.
    pub fn execution_timeout(&self) -> Duration {
        self.execution_timeout
    }

    /// Age after which another dispatcher may steal a task's claim. Must
    /// exceed the execution timeout or healthy runs get stolen.
    pub fn claim_lease_timeout(&self) -> Duration {
        self.claim_lease_timeout
    }

    /// Consecutive failures before a task is moved to `failed`; `None`
    /// disables the circuit breaker.
    pub fn consecutive_failure_limit(&self) -> Option<u32> {
        self.consecutive_failure_limit
    }

    /// Whether the background poll loop starts with the engine. Disable for
    /// event-only deployments or tests that dispatch manually.
    pub fn enable_polling(&self) -> bool {
        self.enable_polling
    }

    /// Whether startup sweeps abandoned executions and stale claims.
    pub fn enable_recovery(&self) -> bool {
        self.enable_recovery
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }
}

impl EngineConfigBuilder {
    pub fn max_concurrent_executions(mut self, max: usize) -> Self {
        self.config.max_concurrent_executions = max;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.config.execution_timeout = timeout;
        self
    }

    pub fn claim_lease_timeout(mut self, timeout: Duration) -> Self {
        self.config.claim_lease_timeout = timeout;
        self
    }

    pub fn consecutive_failure_limit(mut self, limit: Option<u32>) -> Self {
        self.config.consecutive_failure_limit = limit;
        self
    }

    pub fn enable_polling(mut self, enabled: bool) -> Self {
        self.config.enable_polling = enabled;
        self
    }

    pub fn enable_recovery(mut self, enabled: bool) -> Self {
        self.config.enable_recovery = enabled;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<EngineConfig, EngineError> {
        let config = self.config;

        if config.max_concurrent_executions == 0 {
            return Err(EngineError::Configuration(
                "max_concurrent_executions must be at least 1".to_string(),
            ));
        }
        if config.poll_interval.is_zero() {
            return Err(EngineError::Configuration(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        if config.execution_timeout.is_zero() {
            return Err(EngineError::Configuration(
                "execution_timeout must be non-zero".to_string(),
            ));
        }
        if config.claim_lease_timeout <= config.execution_timeout {
            return Err(EngineError::Configuration(format!(
                "claim_lease_timeout ({}s) must exceed execution_timeout ({}s)",
                config.claim_lease_timeout.as_secs(),
                config.execution_timeout.as_secs()
            )));
        }
        if config.consecutive_failure_limit == Some(0) {
            return Err(EngineError::Configuration(
                "consecutive_failure_limit must be at least 1 when set".to_string(),
            ));
        }
        // The failure counter column is an i32.
        if let Some(limit) = config.consecutive_failure_limit {
            if limit > i32::MAX as u32 {
                return Err(EngineError::Configuration(format!(
                    "consecutive_failure_limit must not exceed {}",
                    i32::MAX
                )));
            }
        }

        Ok(config)
    }
}
