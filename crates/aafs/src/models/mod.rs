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

//! Domain models for pending tasks and relay items.
//!
//! These are the backend-independent shapes handed to callers. The SQLite
//! row structs live in [`crate::dal::models`] and convert into these.

pub mod pending_task;
pub mod relay_item;

use serde::{Deserialize, Serialize};

/// Sort direction for range queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// A half-open time window `[lo, hi)` in milliseconds.
///
/// A missing bound is unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub lo: Option<i64>,
    pub hi: Option<i64>,
}

impl TimeRange {
    pub fn new(lo: Option<i64>, hi: Option<i64>) -> Self {
        Self { lo, hi }
    }

    /// The unbounded window.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn since(lo: i64) -> Self {
        Self {
            lo: Some(lo),
            hi: None,
        }
    }

    pub fn before(hi: i64) -> Self {
        Self {
            lo: None,
            hi: Some(hi),
        }
    }

    pub fn contains(&self, time_ms: i64) -> bool {
        self.lo.map_or(true, |lo| time_ms >= lo) && self.hi.map_or(true, |hi| time_ms < hi)
    }
}
