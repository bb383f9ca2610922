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

//! In-process store backend.
//!
//! Every operation runs inside one `parking_lot` critical section, which gives
//! the same atomicity the SQLite backend gets from `IMMEDIATE` transactions.
//! Accepted relay writes are published on a `tokio` broadcast channel, which
//! backs the memory change feed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::pending_task::{PendingTask, TaskClaim, TaskOrderKey, TaskQuery, TaskStaging};
use crate::models::relay_item::{write_supersedes, RelayItem, RelayQuery, RelayStamp};
use crate::models::SortOrder;

/// Buffered change notifications per subscriber before it is considered lagged.
const CHANGE_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct RelayState {
    items: HashMap<String, RelayItem>,
    last_seq: i64,
}

/// Shared in-memory store.
#[derive(Debug)]
pub struct MemoryStore {
    tasks: Mutex<HashMap<Uuid, PendingTask>>,
    relay: Mutex<RelayState>,
    changes: Mutex<broadcast::Sender<RelayItem>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            tasks: Mutex::new(HashMap::new()),
            relay: Mutex::new(RelayState::default()),
            changes: Mutex::new(sender),
            available: AtomicBool::new(true),
        }
    }

    /// Takes the store offline or back online. While offline every operation
    /// fails with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Drops the current change feed, ending every open subscription.
    pub fn reset_change_feed(&self) {
        let (sender, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        *self.changes.lock() = sender;
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        }
    }

    // ------------------------------------------------------------------
    // Pending tasks
    // ------------------------------------------------------------------

    pub fn insert_task(&self, task: PendingTask) -> Result<PendingTask, StoreError> {
        self.check_available()?;
        self.tasks.lock().insert(task.id, task.clone());
        Ok(task)
    }

    pub fn get_task(&self, id: Uuid) -> Result<Option<PendingTask>, StoreError> {
        self.check_available()?;
        Ok(self.tasks.lock().get(&id).cloned())
    }

    fn first_ready(tasks: &HashMap<Uuid, PendingTask>, cutoff: i64) -> Option<Uuid> {
        tasks
            .values()
            .filter(|t| t.is_ready_at(cutoff))
            .min_by_key(|t| t.order_key())
            .map(|t| t.id)
    }

    pub fn first_ready_task(&self, cutoff: i64) -> Result<Option<PendingTask>, StoreError> {
        self.check_available()?;
        let tasks = self.tasks.lock();
        Ok(Self::first_ready(&tasks, cutoff).and_then(|id| tasks.get(&id).cloned()))
    }

    pub fn activate_first_ready_task(
        &self,
        cutoff: i64,
        claim: TaskClaim,
    ) -> Result<Option<PendingTask>, StoreError> {
        self.check_available()?;
        let mut tasks = self.tasks.lock();
        let Some(id) = Self::first_ready(&tasks, cutoff) else {
            return Ok(None);
        };
        Ok(tasks.get_mut(&id).map(|task| {
            task.claim = Some(claim);
            task.clone()
        }))
    }

    fn holds_claim(task: &PendingTask, claim_id: Uuid) -> bool {
        task.claim_id() == Some(claim_id)
    }

    /// Stages a task held under `claim_id`. Returns false if the claim is not held.
    pub fn stage_task(
        &self,
        id: Uuid,
        claim_id: Uuid,
        staging: &TaskStaging,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(&id) {
            Some(task) if Self::holds_claim(task, claim_id) => {
                task.apply_staging(staging);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Deletes a task held under `claim_id`. Returns false if the claim is not held.
    pub fn delete_claimed_task(&self, id: Uuid, claim_id: Uuid) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut tasks = self.tasks.lock();
        if tasks.get(&id).is_some_and(|t| Self::holds_claim(t, claim_id)) {
            tasks.remove(&id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn delete_task_by_id(&self, id: Uuid) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.tasks.lock().remove(&id).is_some())
    }

    /// Returns tasks matching `query`, strictly after `after` in query order.
    pub fn query_tasks(
        &self,
        query: &TaskQuery,
        after: Option<TaskOrderKey>,
    ) -> Result<Vec<PendingTask>, StoreError> {
        self.check_available()?;
        let tasks = self.tasks.lock();
        let mut matched: Vec<PendingTask> = tasks
            .values()
            .filter(|t| query.matches(t))
            .filter(|t| match (after, query.order) {
                (None, _) => true,
                (Some(key), SortOrder::Ascending) => t.order_key() > key,
                (Some(key), SortOrder::Descending) => t.order_key() < key,
            })
            .cloned()
            .collect();
        drop(tasks);

        matched.sort_by_key(|t| t.order_key());
        if query.order == SortOrder::Descending {
            matched.reverse();
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit.max(0) as usize);
        }
        Ok(matched)
    }

    pub fn count_tasks(&self, query: &TaskQuery) -> Result<i64, StoreError> {
        self.check_available()?;
        Ok(self.tasks.lock().values().filter(|t| query.matches(t)).count() as i64)
    }

    pub fn delete_tasks(&self, query: &TaskQuery) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, t| !query.matches(t));
        Ok(before - tasks.len())
    }

    pub fn reset_expired_claims(&self, claimed_before: i64) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut reset = 0;
        for task in self.tasks.lock().values_mut() {
            if task
                .claim
                .as_ref()
                .is_some_and(|c| c.claimed_at < claimed_before)
            {
                task.claim = None;
                reset += 1;
            }
        }
        Ok(reset)
    }

    pub fn cancel_waiting_tasks(&self, opcodes: &[i32]) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, t| t.is_activated() || !opcodes.contains(&t.opcode));
        Ok(before - tasks.len())
    }

    // ------------------------------------------------------------------
    // Relay items
    // ------------------------------------------------------------------

    pub fn submit_relay_item(
        &self,
        relay_id: &str,
        relay_time: i64,
        relay_stamp: RelayStamp,
        details: serde_json::Value,
        f_force: bool,
    ) -> Result<Option<RelayItem>, StoreError> {
        self.check_available()?;
        let mut relay = self.relay.lock();
        if !write_supersedes(relay.items.get(relay_id), relay_time, relay_stamp, f_force) {
            return Ok(None);
        }

        relay.last_seq += 1;
        let item = RelayItem {
            relay_id: relay_id.to_string(),
            relay_time,
            relay_stamp,
            details,
            change_seq: relay.last_seq,
        };
        relay.items.insert(item.relay_id.clone(), item.clone());

        // Published under the relay lock so subscribers see commit order.
        // No subscribers is not an error.
        let _ = self.changes.lock().send(item.clone());
        Ok(Some(item))
    }

    pub fn get_relay_item(&self, relay_id: &str) -> Result<Option<RelayItem>, StoreError> {
        self.check_available()?;
        Ok(self.relay.lock().items.get(relay_id).cloned())
    }

    /// Returns matching items ordered by `(relay_time, relay_id)`.
    pub fn query_relay_items(&self, query: &RelayQuery) -> Result<Vec<RelayItem>, StoreError> {
        self.check_available()?;
        let mut matched: Vec<RelayItem> = self
            .relay
            .lock()
            .items
            .values()
            .filter(|i| query.matches(i))
            .cloned()
            .collect();

        matched.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        if query.order == SortOrder::Descending {
            matched.reverse();
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit.max(0) as usize);
        }
        Ok(matched)
    }

    pub fn delete_relay_item(&self, relay_id: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.relay.lock().items.remove(relay_id).is_some())
    }

    pub fn delete_relay_items(&self, query: &RelayQuery) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut relay = self.relay.lock();
        let before = relay.items.len();
        relay.items.retain(|_, i| !query.matches(i));
        Ok(before - relay.items.len())
    }

    /// The highest change sequence number handed out so far.
    pub fn last_change_seq(&self) -> Result<i64, StoreError> {
        self.check_available()?;
        Ok(self.relay.lock().last_seq)
    }

    pub fn subscribe_relay_changes(
        &self,
    ) -> Result<broadcast::Receiver<RelayItem>, StoreError> {
        self.check_available()?;
        Ok(self.changes.lock().subscribe())
    }

    /// Removes all tasks and relay items.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.check_available()?;
        self.tasks.lock().clear();
        self.relay.lock().items.clear();
        Ok(())
    }
}
