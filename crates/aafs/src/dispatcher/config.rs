/*
 *  Copyright 2025-2026 Colliery Software
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

//! Dispatcher configuration.

use std::time::Duration;

/// Configuration for the task dispatcher.
///
/// ```rust,ignore
/// let config = DispatcherConfig::builder()
///     .poll_interval(Duration::from_millis(250))
///     .claim_timeout(Duration::from_secs(600))
///     .build();
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct DispatcherConfig {
    poll_interval: Duration,
    claim_timeout: Duration,
    recovery_interval: Duration,
    enable_recovery: bool,
    repost_delay: Duration,
    submit_id: String,
}

impl DispatcherConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> DispatcherConfigBuilder {
        DispatcherConfigBuilder::default()
    }

    /// How often the run loop looks for ready tasks when idle.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Age after which an activated task is presumed abandoned.
    pub fn claim_timeout(&self) -> Duration {
        self.claim_timeout
    }

    /// How often the run loop sweeps for abandoned claims.
    pub fn recovery_interval(&self) -> Duration {
        self.recovery_interval
    }

    pub fn enable_recovery(&self) -> bool {
        self.enable_recovery
    }

    /// Delay applied when a handler asks for its task to be reposted.
    pub fn repost_delay(&self) -> Duration {
        self.repost_delay
    }

    /// Identifies this dispatcher on tasks it submits.
    pub fn submit_id(&self) -> &str {
        &self.submit_id
    }
}

/// Builder for [`DispatcherConfig`].
#[derive(Debug, Clone)]
pub struct DispatcherConfigBuilder {
    config: DispatcherConfig,
}

impl Default for DispatcherConfigBuilder {
    fn default() -> Self {
        Self {
            config: DispatcherConfig {
                poll_interval: Duration::from_millis(500),
                claim_timeout: Duration::from_secs(900),
                recovery_interval: Duration::from_secs(60),
                enable_recovery: true,
                repost_delay: Duration::from_secs(30),
                submit_id: "aafs".to_string(),
            },
        }
    }
}

impl DispatcherConfigBuilder {
    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.config.poll_interval = value;
        self
    }

    pub fn claim_timeout(mut self, value: Duration) -> Self {
        self.config.claim_timeout = value;
        self
    }

    pub fn recovery_interval(mut self, value: Duration) -> Self {
        self.config.recovery_interval = value;
        self
    }

    pub fn enable_recovery(mut self, value: bool) -> Self {
        self.config.enable_recovery = value;
        self
    }

    pub fn repost_delay(mut self, value: Duration) -> Self {
        self.config.repost_delay = value;
        self
    }

    pub fn submit_id(mut self, value: impl Into<String>) -> Self {
        self.config.submit_id = value.into();
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> DispatcherConfig {
        self.config
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfigBuilder::default().build()
    }
}
