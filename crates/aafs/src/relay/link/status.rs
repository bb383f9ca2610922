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

//! Link status computation.
//!
//! Everything here is a pure function of the relay snapshot, the link
//! configuration, the previous local status and the current time. Nothing
//! computed here is stored; the role is re-derived on every poll.

use std::collections::HashMap;
use std::fmt;

use tracing::warn;

use super::config::RelayLinkConfig;
use crate::models::relay_item::RelayItem;
use crate::relay::payload::{
    decode_payload, AnalystSelection, ForeignStatus, LinkMode, LinkRole, PdlCompletion,
    PdlForeign, PrimaryCommand, RelayKind, ServerState, ServerStatus, TypedPayload,
};

/// Latest known value of every relay item this server has seen.
#[derive(Debug, Clone, Default)]
pub struct RelaySnapshot {
    items: HashMap<String, RelayItem>,
}

impl RelaySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an item unless a later commit of the same id is already held.
    pub fn apply(&mut self, item: RelayItem) -> bool {
        match self.items.get(&item.relay_id) {
            Some(held) if held.change_seq >= item.change_seq => false,
            _ => {
                self.items.insert(item.relay_id.clone(), item);
                true
            }
        }
    }

    /// Replaces everything held with `relay_time >= lo` by a fresh read of
    /// that window, so items deleted from the store are dropped.
    ///
    /// `read_seq` is the store's change sequence taken before the read; held
    /// items committed after it are kept.
    pub fn replace_window(
        &mut self,
        lo: Option<i64>,
        items: Vec<RelayItem>,
        read_seq: i64,
    ) -> usize {
        let before = self.items.len();
        self.items.retain(|relay_id, held| {
            let in_window = lo.map_or(true, |lo| held.relay_time >= lo);
            !in_window
                || held.change_seq > read_seq
                || items.iter().any(|item| &item.relay_id == relay_id)
        });
        let dropped = before - self.items.len();
        for item in items {
            self.apply(item);
        }
        dropped
    }

    pub fn get(&self, relay_id: &str) -> Option<&RelayItem> {
        self.items.get(relay_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn of_kind(&self, kind: RelayKind) -> impl Iterator<Item = &RelayItem> {
        self.items
            .values()
            .filter(move |item| item.relay_id.starts_with(kind.prefix()))
    }

    /// Decodes every item of `T`'s kind, skipping (and logging) bad payloads.
    fn decoded<T: TypedPayload>(&self) -> impl Iterator<Item = (&RelayItem, T)> {
        self.of_kind(T::KIND)
            .filter_map(|item| match decode_payload::<T>(item) {
                Ok(payload) => Some((item, payload)),
                Err(e) => {
                    warn!("Ignoring relay item '{}': {}", item.relay_id, e);
                    None
                }
            })
    }
}

/// Why a server holds its current role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleReason {
    /// Solo mode; there is no partner.
    Solo,
    /// This server is the designated primary.
    Designated,
    /// The designated primary is alive.
    PeerAlive,
    /// A primary command or analyst selection names the peer, which has not
    /// announced a shutdown since.
    Commanded,
    /// Watch mode never takes over.
    WatchOnly,
    /// A takeover was abandoned because products from elsewhere appeared.
    ForeignDetected,
    /// The designated primary is silent, so this server took over.
    Takeover,
}

impl fmt::Display for RoleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoleReason::Solo => "solo",
            RoleReason::Designated => "designated",
            RoleReason::PeerAlive => "peer_alive",
            RoleReason::Commanded => "commanded",
            RoleReason::WatchOnly => "watch_only",
            RoleReason::ForeignDetected => "foreign_detected",
            RoleReason::Takeover => "takeover",
        };
        f.write_str(s)
    }
}

/// Where the designated primary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesignationSource {
    Command,
    Analyst,
    LastCompletion,
    Configured,
}

impl DesignationSource {
    /// An explicit operator or analyst choice, as opposed to an inference.
    pub fn is_explicit(&self) -> bool {
        matches!(self, DesignationSource::Command | DesignationSource::Analyst)
    }
}

/// The designated primary and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Designation {
    pub server: u8,
    pub source: DesignationSource,
    /// Time of the command or selection, or 0 for inferred designations.
    pub since: i64,
}

/// Inputs to [`evaluate_role`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleFacts {
    pub mode: LinkMode,
    pub local_server: u8,
    pub designated_primary: u8,
    pub peer_alive: bool,
    /// An explicit designation of the peer still binds this server.
    pub commanded: bool,
    /// This server, while acting as a takeover primary, detected products
    /// it did not send.
    pub foreign_since_takeover: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleDecision {
    pub role: LinkRole,
    pub reason: RoleReason,
}

impl RoleDecision {
    fn primary(reason: RoleReason) -> Self {
        Self {
            role: LinkRole::Primary,
            reason,
        }
    }

    fn secondary(reason: RoleReason) -> Self {
        Self {
            role: LinkRole::Secondary,
            reason,
        }
    }
}

/// Decides this server's role.
pub fn evaluate_role(facts: &RoleFacts) -> RoleDecision {
    if facts.mode == LinkMode::Solo {
        return RoleDecision::primary(RoleReason::Solo);
    }
    if facts.designated_primary == facts.local_server {
        return RoleDecision::primary(RoleReason::Designated);
    }
    if facts.peer_alive {
        return RoleDecision::secondary(RoleReason::PeerAlive);
    }
    if facts.commanded {
        return RoleDecision::secondary(RoleReason::Commanded);
    }
    if facts.mode == LinkMode::Watch {
        return RoleDecision::secondary(RoleReason::WatchOnly);
    }
    if facts.foreign_since_takeover {
        return RoleDecision::secondary(RoleReason::ForeignDetected);
    }
    RoleDecision::primary(RoleReason::Takeover)
}

/// This server's view of itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStatus {
    pub server_number: u8,
    pub mode: LinkMode,
    pub role: LinkRole,
    pub reason: RoleReason,
    pub designated_primary: u8,
    pub designation: DesignationSource,
    /// When this server last became primary, or 0 while secondary.
    pub primary_since: i64,
    /// Start of the current (or abandoned) takeover, or 0.
    pub takeover_since: i64,
    pub evaluated_at: i64,
}

impl LocalStatus {
    pub fn is_primary(&self) -> bool {
        self.role == LinkRole::Primary
    }
}

/// This server's view of its peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
    pub server_number: u8,
    /// The peer's last published status, if any.
    pub status: Option<ServerStatus>,
    pub alive: bool,
}

/// Resolves the designated primary: the latest primary command or
/// analyst selection carrying a primary server, else the server that made the
/// most recent product completion, else the configured primary.
pub fn designated_primary(snapshot: &RelaySnapshot, configured_primary: u8) -> Designation {
    let command = snapshot
        .decoded::<PrimaryCommand>()
        .map(|(item, command)| {
            (
                (item.relay_time, item.change_seq),
                command.primary_server,
                DesignationSource::Command,
            )
        });
    let selection = snapshot
        .decoded::<AnalystSelection>()
        .filter_map(|(item, selection)| {
            selection.primary_server.map(|server| {
                (
                    (item.relay_time, item.change_seq),
                    server,
                    DesignationSource::Analyst,
                )
            })
        });
    let latest = command.chain(selection).max_by_key(|(key, _, _)| *key);
    if let Some(((since, _), server, source)) = latest {
        return Designation {
            server,
            source,
            since,
        };
    }

    let completion = snapshot
        .decoded::<PdlCompletion>()
        .max_by_key(|(item, _)| (item.relay_time, item.change_seq));
    if let Some((_, completion)) = completion {
        return Designation {
            server: completion.server_number,
            source: DesignationSource::LastCompletion,
            since: 0,
        };
    }

    Designation {
        server: configured_primary,
        source: DesignationSource::Configured,
        since: 0,
    }
}

/// True if the peer announced a shutdown at or after `since`.
fn peer_released_since(remote: &RemoteStatus, since: i64) -> bool {
    remote.status.as_ref().is_some_and(|status| {
        status.state == ServerState::ShuttingDown && status.heartbeat_time >= since
    })
}

/// Reads the peer's status. The peer is alive if it is running and its
/// heartbeat is no older than `peer_timeout_ms`.
pub fn compute_remote_status(
    snapshot: &RelaySnapshot,
    peer_server: u8,
    now_ms: i64,
    peer_timeout_ms: i64,
) -> RemoteStatus {
    let relay_id = RelayKind::ServerStatus.relay_id(&peer_server.to_string());
    let status = snapshot
        .get(&relay_id)
        .and_then(|item| match decode_payload::<ServerStatus>(item) {
            Ok(status) => Some(status),
            Err(e) => {
                warn!("Ignoring peer status '{}': {}", relay_id, e);
                None
            }
        });
    let alive = status.as_ref().is_some_and(|s| {
        s.state == ServerState::Running && now_ms - s.heartbeat_time <= peer_timeout_ms
    });
    RemoteStatus {
        server_number: peer_server,
        status,
        alive,
    }
}

/// True if `local_server` detected a foreign product at or after `since`.
pub fn foreign_detected_since(snapshot: &RelaySnapshot, local_server: u8, since: i64) -> bool {
    snapshot.decoded::<PdlForeign>().any(|(_, foreign)| {
        foreign.status == ForeignStatus::Detected
            && foreign.detected_by == local_server
            && foreign.detect_time >= since
    })
}

/// Computes both statuses for this poll.
pub fn compute_link_status(
    snapshot: &RelaySnapshot,
    config: &RelayLinkConfig,
    previous: Option<&LocalStatus>,
    now_ms: i64,
) -> (LocalStatus, RemoteStatus) {
    let remote = compute_remote_status(
        snapshot,
        config.peer_server(),
        now_ms,
        config.peer_timeout().as_millis() as i64,
    );
    let designation = designated_primary(snapshot, config.configured_primary());
    let commanded = designation.source.is_explicit()
        && designation.server != config.server_number()
        && !peer_released_since(&remote, designation.since);

    let prior_takeover = previous
        .filter(|p| matches!(p.reason, RoleReason::Takeover | RoleReason::ForeignDetected))
        .map(|p| p.takeover_since)
        .filter(|since| *since > 0);
    let foreign_since_takeover = prior_takeover
        .is_some_and(|since| foreign_detected_since(snapshot, config.server_number(), since));

    let decision = evaluate_role(&RoleFacts {
        mode: config.mode(),
        local_server: config.server_number(),
        designated_primary: designation.server,
        peer_alive: remote.alive,
        commanded,
        foreign_since_takeover,
    });

    let primary_since = match (decision.role, previous) {
        (LinkRole::Primary, Some(p)) if p.is_primary() => p.primary_since,
        (LinkRole::Primary, _) => now_ms,
        (LinkRole::Secondary, _) => 0,
    };
    let takeover_since = match decision.reason {
        RoleReason::Takeover | RoleReason::ForeignDetected => prior_takeover.unwrap_or(now_ms),
        _ => 0,
    };

    let local = LocalStatus {
        server_number: config.server_number(),
        mode: config.mode(),
        role: decision.role,
        reason: decision.reason,
        designated_primary: designation.server,
        designation: designation.source,
        primary_since,
        takeover_since,
        evaluated_at: now_ms,
    };
    (local, remote)
}
