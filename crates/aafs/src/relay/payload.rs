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

//! Relay payload kinds.
//!
//! The kind of a relay item is encoded in the prefix of its `relay_id`; the
//! remainder of the id is the key (an event id, a server number, or a fixed
//! name). `details` holds the payload for that kind as JSON. Decoding an
//! item as any other kind is a caller bug and fails with
//! [`RelayError::PayloadMismatch`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RelayError;
use crate::models::relay_item::RelayItem;

/// Forecast identity carried by product completion and removal records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ForecastStamp(pub i64);

impl fmt::Display for ForecastStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed set of relay item kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayKind {
    /// A product was sent (or deliberately not sent) for an event.
    PdlCompletion,
    /// A product was withdrawn for an event.
    PdlRemoval,
    /// A product from another source was detected for an event.
    PdlForeign,
    /// An analyst changed the state of an event.
    AnalystSelection,
    /// A server's own view of its role, refreshed as a heartbeat.
    ServerStatus,
    /// Operator command designating the primary server.
    PrimaryCommand,
}

impl RelayKind {
    pub const ALL: [RelayKind; 6] = [
        RelayKind::PdlCompletion,
        RelayKind::PdlRemoval,
        RelayKind::PdlForeign,
        RelayKind::AnalystSelection,
        RelayKind::ServerStatus,
        RelayKind::PrimaryCommand,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            RelayKind::PdlCompletion => "pdlc_",
            RelayKind::PdlRemoval => "pdlr_",
            RelayKind::PdlForeign => "pdlf_",
            RelayKind::AnalystSelection => "anas_",
            RelayKind::ServerStatus => "srvst_",
            RelayKind::PrimaryCommand => "prist_",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RelayKind::PdlCompletion => "pdl_completion",
            RelayKind::PdlRemoval => "pdl_removal",
            RelayKind::PdlForeign => "pdl_foreign",
            RelayKind::AnalystSelection => "analyst_selection",
            RelayKind::ServerStatus => "server_status",
            RelayKind::PrimaryCommand => "primary_command",
        }
    }

    /// Builds the relay id for `key`.
    pub fn relay_id(&self, key: &str) -> String {
        format!("{}{}", self.prefix(), key)
    }
}

impl fmt::Display for RelayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classifies a relay id by its prefix.
pub fn classify_relay_id(relay_id: &str) -> Option<RelayKind> {
    RelayKind::ALL
        .into_iter()
        .find(|kind| relay_id.starts_with(kind.prefix()))
}

/// Splits a relay id into its kind and key.
pub fn split_relay_id(relay_id: &str) -> Option<(RelayKind, &str)> {
    let kind = classify_relay_id(relay_id)?;
    Some((kind, &relay_id[kind.prefix().len()..]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionAction {
    Submitted,
    /// Nothing was sent because the forecast was unchanged or not due.
    Skipped,
    /// Sending was suppressed, for example by an analyst block.
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdlCompletion {
    pub action: CompletionAction,
    pub forecast_stamp: ForecastStamp,
    pub update_time: i64,
    /// Server that performed the action.
    pub server_number: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// A larger event now covers this one.
    Shadowed,
    Withdrawn,
    Expired,
    Analyst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdlRemoval {
    pub reason: RemovalReason,
    pub forecast_stamp: ForecastStamp,
    pub remove_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignStatus {
    Detected,
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdlForeign {
    pub status: ForeignStatus,
    pub detect_time: i64,
    /// Server that saw the foreign product.
    pub detected_by: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalystStateChange {
    Start,
    Stop,
    Withdraw,
    Resume,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalystSelection {
    pub state_change: AnalystStateChange,
    /// Whether a timeline should be created if none exists.
    pub create_timeline: bool,
    pub analyst_time: i64,
    /// Server the analyst made primary, if the selection carries a role
    /// command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_server: Option<u8>,
}

/// Role a server currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRole {
    Primary,
    Secondary,
}

impl fmt::Display for LinkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkRole::Primary => f.write_str("primary"),
            LinkRole::Secondary => f.write_str("secondary"),
        }
    }
}

/// How a server participates in the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    /// No partner; always primary.
    Solo,
    /// Observes the partner but never takes over.
    Watch,
    /// Full redundant pair with takeover.
    #[default]
    Pair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Running,
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub server_number: u8,
    pub role: LinkRole,
    pub state: ServerState,
    pub mode: LinkMode,
    pub heartbeat_time: i64,
    /// When the server last became primary, or 0.
    pub primary_since: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryCommand {
    pub primary_server: u8,
    pub command_time: i64,
}

/// A payload type bound to one relay kind.
pub trait TypedPayload: Serialize + DeserializeOwned {
    const KIND: RelayKind;

    /// The logical time written as the item's `relay_time`.
    fn relay_time(&self) -> i64;

    fn into_payload(self) -> RelayPayload;
}

macro_rules! typed_payload {
    ($ty:ident, $kind:ident, $time:ident) => {
        impl TypedPayload for $ty {
            const KIND: RelayKind = RelayKind::$kind;

            fn relay_time(&self) -> i64 {
                self.$time
            }

            fn into_payload(self) -> RelayPayload {
                RelayPayload::$kind(self)
            }
        }
    };
}

typed_payload!(PdlCompletion, PdlCompletion, update_time);
typed_payload!(PdlRemoval, PdlRemoval, remove_time);
typed_payload!(PdlForeign, PdlForeign, detect_time);
typed_payload!(AnalystSelection, AnalystSelection, analyst_time);
typed_payload!(ServerStatus, ServerStatus, heartbeat_time);
typed_payload!(PrimaryCommand, PrimaryCommand, command_time);

/// A decoded relay payload of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayPayload {
    PdlCompletion(PdlCompletion),
    PdlRemoval(PdlRemoval),
    PdlForeign(PdlForeign),
    AnalystSelection(AnalystSelection),
    ServerStatus(ServerStatus),
    PrimaryCommand(PrimaryCommand),
}

impl RelayPayload {
    pub fn kind(&self) -> RelayKind {
        match self {
            RelayPayload::PdlCompletion(_) => RelayKind::PdlCompletion,
            RelayPayload::PdlRemoval(_) => RelayKind::PdlRemoval,
            RelayPayload::PdlForeign(_) => RelayKind::PdlForeign,
            RelayPayload::AnalystSelection(_) => RelayKind::AnalystSelection,
            RelayPayload::ServerStatus(_) => RelayKind::ServerStatus,
            RelayPayload::PrimaryCommand(_) => RelayKind::PrimaryCommand,
        }
    }

    pub fn relay_time(&self) -> i64 {
        match self {
            RelayPayload::PdlCompletion(p) => p.relay_time(),
            RelayPayload::PdlRemoval(p) => p.relay_time(),
            RelayPayload::PdlForeign(p) => p.relay_time(),
            RelayPayload::AnalystSelection(p) => p.relay_time(),
            RelayPayload::ServerStatus(p) => p.relay_time(),
            RelayPayload::PrimaryCommand(p) => p.relay_time(),
        }
    }

    /// Encodes the payload as the item's `details`.
    pub fn to_details(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            RelayPayload::PdlCompletion(p) => serde_json::to_value(p),
            RelayPayload::PdlRemoval(p) => serde_json::to_value(p),
            RelayPayload::PdlForeign(p) => serde_json::to_value(p),
            RelayPayload::AnalystSelection(p) => serde_json::to_value(p),
            RelayPayload::ServerStatus(p) => serde_json::to_value(p),
            RelayPayload::PrimaryCommand(p) => serde_json::to_value(p),
        }
    }

    /// Decodes an item according to the kind its id classifies as.
    pub fn decode(item: &RelayItem) -> Result<RelayPayload, RelayError> {
        let kind = classify_relay_id(&item.relay_id)
            .ok_or_else(|| RelayError::UnknownKind(item.relay_id.clone()))?;
        Ok(match kind {
            RelayKind::PdlCompletion => decode_payload::<PdlCompletion>(item)?.into_payload(),
            RelayKind::PdlRemoval => decode_payload::<PdlRemoval>(item)?.into_payload(),
            RelayKind::PdlForeign => decode_payload::<PdlForeign>(item)?.into_payload(),
            RelayKind::AnalystSelection => {
                decode_payload::<AnalystSelection>(item)?.into_payload()
            }
            RelayKind::ServerStatus => decode_payload::<ServerStatus>(item)?.into_payload(),
            RelayKind::PrimaryCommand => decode_payload::<PrimaryCommand>(item)?.into_payload(),
        })
    }
}

/// Decodes `item` as `T`, checking that the id classifies as `T::KIND`.
pub fn decode_payload<T: TypedPayload>(item: &RelayItem) -> Result<T, RelayError> {
    match classify_relay_id(&item.relay_id) {
        Some(kind) if kind == T::KIND => {}
        Some(kind) => {
            return Err(RelayError::PayloadMismatch {
                relay_id: item.relay_id.clone(),
                expected: T::KIND.name().to_string(),
                found: kind.name().to_string(),
            })
        }
        None => return Err(RelayError::UnknownKind(item.relay_id.clone())),
    }

    serde_json::from_value(item.details.clone()).map_err(|source| RelayError::MalformedPayload {
        relay_id: item.relay_id.clone(),
        source,
    })
}
