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

//! Relay: replicating coordination state between the two servers of a pair.
//!
//! Relay items are small last-writer-wins records in the shared store. The
//! [`RelayThread`] keeps a local queue fed by the store's change feed, and
//! the [`RelayLink`] turns the items it sees into a primary/secondary role
//! for this server.

pub mod link;
pub mod payload;
pub mod thread;

pub use link::status::{LocalStatus, RemoteStatus, RoleDecision, RoleReason};
pub use link::{RelayLink, RelayLinkConfig, RelayLinkConfigBuilder};
pub use payload::{
    classify_relay_id, decode_payload, split_relay_id, RelayKind, RelayPayload, TypedPayload,
};
pub use thread::{RelaySentinel, RelayThread};
