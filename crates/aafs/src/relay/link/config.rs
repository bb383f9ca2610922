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

//! Relay link configuration.

use std::time::Duration;

use crate::relay::payload::LinkMode;

/// Configuration for a [`RelayLink`](super::RelayLink).
///
/// ```rust,ignore
/// let config = RelayLinkConfig::builder()
///     .server_number(2)
///     .mode(LinkMode::Pair)
///     .peer_timeout(Duration::from_secs(30))
///     .build();
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct RelayLinkConfig {
    server_number: u8,
    mode: LinkMode,
    configured_primary: u8,
    heartbeat_interval: Duration,
    peer_timeout: Duration,
    resync_interval: Duration,
    resync_lookback: Duration,
    primary_only_opcodes: Vec<i32>,
    secondary_only_opcodes: Vec<i32>,
    link_key: String,
}

impl RelayLinkConfig {
    pub fn builder() -> RelayLinkConfigBuilder {
        RelayLinkConfigBuilder::default()
    }

    /// This server's number in the pair, 1 or 2.
    pub fn server_number(&self) -> u8 {
        self.server_number
    }

    /// The other server's number.
    pub fn peer_server(&self) -> u8 {
        if self.server_number == 1 {
            2
        } else {
            1
        }
    }

    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    /// Primary used when no command or completion designates one.
    pub fn configured_primary(&self) -> u8 {
        self.configured_primary
    }

    /// How often this server's status is rewritten when nothing changes.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Heartbeat age after which the peer is considered dead.
    pub fn peer_timeout(&self) -> Duration {
        self.peer_timeout
    }

    /// How often a full resync runs even if the change feed stayed up.
    pub fn resync_interval(&self) -> Duration {
        self.resync_interval
    }

    /// How far back a resync reads.
    pub fn resync_lookback(&self) -> Duration {
        self.resync_lookback
    }

    /// Opcodes only a primary may run; cancelled when becoming secondary.
    pub fn primary_only_opcodes(&self) -> &[i32] {
        &self.primary_only_opcodes
    }

    /// Opcodes only a secondary may run; cancelled when becoming primary.
    pub fn secondary_only_opcodes(&self) -> &[i32] {
        &self.secondary_only_opcodes
    }

    /// Key of the primary command item (`prist_<key>`).
    pub fn link_key(&self) -> &str {
        &self.link_key
    }
}

/// Builder for [`RelayLinkConfig`].
#[derive(Debug, Clone)]
pub struct RelayLinkConfigBuilder {
    config: RelayLinkConfig,
}

impl Default for RelayLinkConfigBuilder {
    fn default() -> Self {
        Self {
            config: RelayLinkConfig {
                server_number: 1,
                mode: LinkMode::Pair,
                configured_primary: 1,
                heartbeat_interval: Duration::from_secs(10),
                peer_timeout: Duration::from_secs(60),
                resync_interval: Duration::from_secs(300),
                resync_lookback: Duration::from_secs(3 * 24 * 3600),
                primary_only_opcodes: Vec::new(),
                secondary_only_opcodes: Vec::new(),
                link_key: "link".to_string(),
            },
        }
    }
}

impl RelayLinkConfigBuilder {
    pub fn server_number(mut self, value: u8) -> Self {
        self.config.server_number = value;
        self
    }

    pub fn mode(mut self, value: LinkMode) -> Self {
        self.config.mode = value;
        self
    }

    pub fn configured_primary(mut self, value: u8) -> Self {
        self.config.configured_primary = value;
        self
    }

    pub fn heartbeat_interval(mut self, value: Duration) -> Self {
        self.config.heartbeat_interval = value;
        self
    }

    pub fn peer_timeout(mut self, value: Duration) -> Self {
        self.config.peer_timeout = value;
        self
    }

    pub fn resync_interval(mut self, value: Duration) -> Self {
        self.config.resync_interval = value;
        self
    }

    pub fn resync_lookback(mut self, value: Duration) -> Self {
        self.config.resync_lookback = value;
        self
    }

    pub fn primary_only_opcodes(mut self, value: Vec<i32>) -> Self {
        self.config.primary_only_opcodes = value;
        self
    }

    pub fn secondary_only_opcodes(mut self, value: Vec<i32>) -> Self {
        self.config.secondary_only_opcodes = value;
        self
    }

    pub fn link_key(mut self, value: impl Into<String>) -> Self {
        self.config.link_key = value.into();
        self
    }

    pub fn build(self) -> RelayLinkConfig {
        self.config
    }
}

impl Default for RelayLinkConfig {
    fn default() -> Self {
        RelayLinkConfigBuilder::default().build()
    }
}
