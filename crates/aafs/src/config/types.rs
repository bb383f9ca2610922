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

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ValidationError;
use crate::database::BackendType;
use crate::dispatcher::DispatcherConfig;
use crate::relay::payload::LinkMode;
use crate::relay::RelayLinkConfig;

/// Contents of an `aafs.toml` file. Every section and field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AafsConfig {
    pub database: DatabaseSection,
    pub dispatcher: DispatcherSection,
    pub relay: RelaySection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSection {
    pub poll_interval_ms: u64,
    pub claim_timeout_secs: u64,
    pub recovery_interval_secs: u64,
    pub enable_recovery: bool,
    pub repost_delay_secs: u64,
    pub submit_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    pub server_number: u8,
    pub mode: LinkMode,
    pub configured_primary: u8,
    pub heartbeat_interval_secs: u64,
    pub peer_timeout_secs: u64,
    pub resync_interval_secs: u64,
    pub resync_lookback_secs: u64,
    pub primary_only_opcodes: Vec<i32>,
    pub secondary_only_opcodes: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite://aafs.db".to_string(),
        }
    }
}

impl Default for DispatcherSection {
    fn default() -> Self {
        let defaults = DispatcherConfig::default();
        Self {
            poll_interval_ms: defaults.poll_interval().as_millis() as u64,
            claim_timeout_secs: defaults.claim_timeout().as_secs(),
            recovery_interval_secs: defaults.recovery_interval().as_secs(),
            enable_recovery: defaults.enable_recovery(),
            repost_delay_secs: defaults.repost_delay().as_secs(),
            submit_id: defaults.submit_id().to_string(),
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        let defaults = RelayLinkConfig::default();
        Self {
            server_number: defaults.server_number(),
            mode: defaults.mode(),
            configured_primary: defaults.configured_primary(),
            heartbeat_interval_secs: defaults.heartbeat_interval().as_secs(),
            peer_timeout_secs: defaults.peer_timeout().as_secs(),
            resync_interval_secs: defaults.resync_interval().as_secs(),
            resync_lookback_secs: defaults.resync_lookback().as_secs(),
            primary_only_opcodes: Vec::new(),
            secondary_only_opcodes: Vec::new(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AafsConfig {
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let d = &self.dispatcher;
        DispatcherConfig::builder()
            .poll_interval(Duration::from_millis(d.poll_interval_ms))
            .claim_timeout(Duration::from_secs(d.claim_timeout_secs))
            .recovery_interval(Duration::from_secs(d.recovery_interval_secs))
            .enable_recovery(d.enable_recovery)
            .repost_delay(Duration::from_secs(d.repost_delay_secs))
            .submit_id(d.submit_id.clone())
            .build()
    }

    pub fn relay_link_config(&self) -> RelayLinkConfig {
        let r = &self.relay;
        RelayLinkConfig::builder()
            .server_number(r.server_number)
            .mode(r.mode)
            .configured_primary(r.configured_primary)
            .heartbeat_interval(Duration::from_secs(r.heartbeat_interval_secs))
            .peer_timeout(Duration::from_secs(r.peer_timeout_secs))
            .resync_interval(Duration::from_secs(r.resync_interval_secs))
            .resync_lookback(Duration::from_secs(r.resync_lookback_secs))
            .primary_only_opcodes(r.primary_only_opcodes.clone())
            .secondary_only_opcodes(r.secondary_only_opcodes.clone())
            .build()
    }

    /// The configured log level.
    pub fn log_level(&self) -> Option<tracing::Level> {
        self.logging.level.parse().ok()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        if BackendType::from_url(&self.database.url).is_err() {
            errors.push(ValidationError::InvalidDatabaseUrl {
                url: self.database.url.clone(),
            });
        }

        if self.log_level().is_none() {
            errors.push(ValidationError::InvalidLogLevel {
                level: self.logging.level.clone(),
            });
        }

        let positive = [
            ("dispatcher.poll_interval_ms", self.dispatcher.poll_interval_ms),
            ("dispatcher.claim_timeout_secs", self.dispatcher.claim_timeout_secs),
            ("relay.heartbeat_interval_secs", self.relay.heartbeat_interval_secs),
            ("relay.peer_timeout_secs", self.relay.peer_timeout_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                errors.push(ValidationError::InvalidInterval { field });
            }
        }

        for number in [self.relay.server_number, self.relay.configured_primary] {
            if !(1..=2).contains(&number) {
                errors.push(ValidationError::InvalidServerNumber { number });
            }
        }

        for opcode in &self.relay.primary_only_opcodes {
            if self.relay.secondary_only_opcodes.contains(opcode) {
                errors.push(ValidationError::ConflictingOpcode { opcode: *opcode });
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple { errors }),
        }
    }
}
