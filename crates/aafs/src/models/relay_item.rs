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

//! Relay item model and the last-writer-wins rule.
//!
//! A relay item is a named register shared between servers. Each write
//! carries a logical `relay_time` and a signed `relay_stamp`; the store keeps
//! only the dominant write for each `relay_id`.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{SortOrder, TimeRange};

/// Ordering token carried by every relay write.
///
/// Zero means "no stamp" and always wins. By convention positive stamps are
/// written by the server that owns the value, negative stamps by a server
/// that observed the value indirectly, so a local write outranks an observed
/// one at the same `relay_time`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct RelayStamp(pub i64);

impl RelayStamp {
    pub const NONE: RelayStamp = RelayStamp(0);

    /// A stamp for a value this server owns.
    pub fn forced(value: i64) -> Self {
        RelayStamp(value.checked_abs().unwrap_or(i64::MAX).max(1))
    }

    /// A stamp for a value this server learned about second hand.
    pub fn observed(value: i64) -> Self {
        RelayStamp(-Self::forced(value).0)
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RelayStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored relay item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayItem {
    pub relay_id: String,
    pub relay_time: i64,
    pub relay_stamp: RelayStamp,
    pub details: serde_json::Value,
    /// Commit order assigned by the store on each accepted write.
    pub change_seq: i64,
}

impl RelayItem {
    /// Sort key for fetch-and-sort results.
    pub fn sort_key(&self) -> (i64, &str) {
        (self.relay_time, self.relay_id.as_str())
    }
}

/// Decides whether a write of `(relay_time, relay_stamp)` replaces `existing`.
///
/// A write wins when it is forced, when nothing is stored yet, when it carries
/// no stamp, or when `(relay_time, relay_stamp)` is strictly greater than the
/// stored pair.
pub fn write_supersedes(
    existing: Option<&RelayItem>,
    relay_time: i64,
    relay_stamp: RelayStamp,
    f_force: bool,
) -> bool {
    if f_force || relay_stamp.is_none() {
        return true;
    }
    match existing {
        None => true,
        Some(item) => (relay_time, relay_stamp) > (item.relay_time, item.relay_stamp),
    }
}

/// Filter for relay range queries and bulk deletes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayQuery {
    /// Window over `relay_time`.
    pub time_range: TimeRange,
    /// Only ids starting with this prefix.
    pub id_prefix: Option<String>,
    /// Only these ids. Empty means no restriction.
    pub relay_ids: Vec<String>,
    pub order: SortOrder,
    pub limit: Option<i64>,
}

impl RelayQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn in_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = time_range;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = Some(prefix.into());
        self
    }

    pub fn with_ids<I, S>(mut self, relay_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relay_ids = relay_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn descending(mut self) -> Self {
        self.order = SortOrder::Descending;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, item: &RelayItem) -> bool {
        self.time_range.contains(item.relay_time)
            && self
                .id_prefix
                .as_ref()
                .map_or(true, |p| item.relay_id.starts_with(p.as_str()))
            && (self.relay_ids.is_empty() || self.relay_ids.iter().any(|id| *id == item.relay_id))
    }
}
