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

//! Pending task model.
//!
//! A pending task is one unit of scheduled work. Tasks become *ready* once
//! their `sched_time` is at or before the dispatcher's cutoff, and are executed
//! in `(sched_time, submit_time)` order. While a dispatcher is executing a task
//! it holds a [`TaskClaim`] on it; only the claim holder may stage or delete it.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

use super::{SortOrder, TimeRange};

/// `(sched_time, submit_time, id)`.
pub type TaskOrderKey = (i64, i64, Uuid);

/// The activation marker placed on a task when a dispatcher claims it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskClaim {
    /// Unique token for this activation; stage and delete must present it.
    pub claim_id: Uuid,
    /// Server time at which the claim was taken.
    pub claimed_at: i64,
}

/// A scheduled unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTask {
    pub id: Uuid,
    /// Identifies the earthquake this task concerns. Empty for server-wide tasks.
    pub event_id: String,
    /// Earliest time the task may run.
    pub sched_time: i64,
    /// Time of submission, used as the ordering tie-breaker.
    pub submit_time: i64,
    /// Identifies the submitter (server or tool).
    pub submit_id: String,
    pub opcode: i32,
    pub stage: i32,
    /// Opaque structured payload interpreted by the handler for `opcode`.
    pub details: serde_json::Value,
    /// Present while the task is activated.
    pub claim: Option<TaskClaim>,
}

impl PendingTask {
    pub fn is_activated(&self) -> bool {
        self.claim.is_some()
    }

    /// True if the task is not activated and is due at `cutoff`.
    pub fn is_ready_at(&self, cutoff: i64) -> bool {
        self.claim.is_none() && self.sched_time <= cutoff
    }

    /// Key that totally orders tasks for execution and pagination.
    pub fn order_key(&self) -> TaskOrderKey {
        (self.sched_time, self.submit_time, self.id)
    }

    /// Execution order: `sched_time`, then `submit_time`, then id.
    pub fn execution_order(&self, other: &PendingTask) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }

    /// The claim id this task was activated with, if any.
    pub fn claim_id(&self) -> Option<Uuid> {
        self.claim.as_ref().map(|c| c.claim_id)
    }

    /// Applies a staging request, returning the task as it will be stored.
    pub fn apply_staging(&mut self, staging: &TaskStaging) {
        self.sched_time = staging.sched_time;
        self.stage = staging.stage;
        if let Some(event_id) = &staging.event_id {
            self.event_id = event_id.clone();
        }
        if let Some(details) = &staging.details {
            self.details = details.clone();
        }
        self.claim = None;
    }
}

/// Fields for a task that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPendingTask {
    pub event_id: String,
    pub sched_time: i64,
    /// Filled in from the server clock when not set.
    pub submit_time: Option<i64>,
    pub submit_id: String,
    pub opcode: i32,
    pub stage: i32,
    pub details: serde_json::Value,
}

impl NewPendingTask {
    pub fn new(opcode: i32, sched_time: i64) -> Self {
        Self {
            event_id: String::new(),
            sched_time,
            submit_time: None,
            submit_id: String::new(),
            opcode,
            stage: 0,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    pub fn with_stage(mut self, stage: i32) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_submit_id(mut self, submit_id: impl Into<String>) -> Self {
        self.submit_id = submit_id.into();
        self
    }

    pub fn with_submit_time(mut self, submit_time: i64) -> Self {
        self.submit_time = Some(submit_time);
        self
    }

    /// Materialises the task with a fresh id.
    pub fn into_task(self, now_ms: i64) -> PendingTask {
        PendingTask {
            id: Uuid::new_v4(),
            event_id: self.event_id,
            sched_time: self.sched_time,
            submit_time: self.submit_time.unwrap_or(now_ms),
            submit_id: self.submit_id,
            opcode: self.opcode,
            stage: self.stage,
            details: self.details,
            claim: None,
        }
    }
}

/// Replacement fields for staging an activated task.
///
/// `None` for `event_id` or `details` keeps the stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStaging {
    pub sched_time: i64,
    pub stage: i32,
    pub event_id: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl TaskStaging {
    pub fn new(sched_time: i64, stage: i32) -> Self {
        Self {
            sched_time,
            stage,
            event_id: None,
            details: None,
        }
    }
}

/// Filter for range queries, iteration and bulk deletes over pending tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    /// Window over `sched_time`.
    pub sched_range: TimeRange,
    pub event_id: Option<String>,
    pub opcode: Option<i32>,
    pub order: SortOrder,
    pub limit: Option<i64>,
}

impl TaskQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn in_range(mut self, sched_range: TimeRange) -> Self {
        self.sched_range = sched_range;
        self
    }

    pub fn for_event(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_opcode(mut self, opcode: i32) -> Self {
        self.opcode = Some(opcode);
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

    /// Applies every filter except ordering and limit.
    pub fn matches(&self, task: &PendingTask) -> bool {
        self.sched_range.contains(task.sched_time)
            && self.event_id.as_ref().map_or(true, |e| *e == task.event_id)
            && self.opcode.map_or(true, |op| op == task.opcode)
    }
}
