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

//! Relay link: primary/secondary negotiation between the two servers.
//!
//! Each server publishes a [`ServerStatus`] heartbeat as a relay item and
//! reads its peer's. The role is recomputed from the relay snapshot on every
//! poll (see [`status::evaluate_role`]); when it changes, an
//! [`OPCODE_ROLE_CHANGE`] task is posted so the dispatcher can react.
//!
//! ```rust,ignore
//! let link = RelayLink::new(dal.clone(), RelayLinkConfig::builder().server_number(2).build());
//! link.init_relay_link().await?;
//! loop {
//!     let status = link.poll_relay_link().await?;
//!     // ...
//! }
//! ```

pub mod config;
pub mod status;

pub use config::{RelayLinkConfig, RelayLinkConfigBuilder};

use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info, warn};

use self::status::{compute_link_status, LocalStatus, RelaySnapshot, RemoteStatus};
use super::payload::{LinkRole, PrimaryCommand, ServerState, ServerStatus};
use super::thread::RelayThread;
use crate::dal::DAL;
use crate::dispatcher::OPCODE_ROLE_CHANGE;
use crate::error::RelayError;
use crate::models::pending_task::NewPendingTask;
use crate::models::relay_item::{RelayItem, RelayStamp};
use crate::models::TimeRange;

/// Submit id on tasks posted by the link.
const LINK_SUBMIT_ID: &str = "relay_link";

#[derive(Default)]
struct LinkState {
    snapshot: RelaySnapshot,
    local: Option<LocalStatus>,
    remote: Option<RemoteStatus>,
    last_resync_ms: Option<i64>,
    last_heartbeat_ms: Option<i64>,
}

/// One server's end of the relay link.
pub struct RelayLink {
    dal: DAL,
    config: RelayLinkConfig,
    thread: RelayThread,
    state: Mutex<LinkState>,
}

impl RelayLink {
    pub fn new(dal: DAL, config: RelayLinkConfig) -> Self {
        let thread = RelayThread::new(dal.clone());
        Self::with_thread(dal, config, thread)
    }

    /// Uses an existing relay thread, for example one with a short
    /// resubscribe delay.
    pub fn with_thread(dal: DAL, config: RelayLinkConfig, thread: RelayThread) -> Self {
        Self {
            dal,
            config,
            thread,
            state: Mutex::new(LinkState::default()),
        }
    }

    pub fn config(&self) -> &RelayLinkConfig {
        &self.config
    }

    pub fn relay_thread(&self) -> &RelayThread {
        &self.thread
    }

    pub fn local_status(&self) -> Option<LocalStatus> {
        self.state.lock().local.clone()
    }

    pub fn remote_status(&self) -> Option<RemoteStatus> {
        self.state.lock().remote.clone()
    }

    pub fn is_primary(&self) -> bool {
        self.state
            .lock()
            .local
            .as_ref()
            .is_some_and(LocalStatus::is_primary)
    }

    /// Starts the relay thread, loads every relay item, evaluates the role
    /// and publishes this server's status.
    pub async fn init_relay_link(&self) -> Result<LocalStatus, RelayError> {
        if !self.thread.start_relay_thread() {
            return Err(RelayError::ThreadStart(
                "no tokio runtime available".to_string(),
            ));
        }

        let items = self.thread.run_fetch_and_sort(TimeRange::all()).await?;
        let now = self.dal.now_ms();
        let local = {
            let mut state = self.state.lock();
            apply_all(&mut state.snapshot, items);
            state.last_resync_ms = Some(now);
            let (local, remote) = compute_link_status(&state.snapshot, &self.config, None, now);
            state.local = Some(local.clone());
            state.remote = Some(remote);
            local
        };

        self.publish_status(&local, ServerState::Running, false).await?;
        info!(
            "Relay link initialized: server {} is {} ({})",
            local.server_number, local.role, local.reason
        );
        Ok(local)
    }

    /// Full poll: drains the relay queue, resyncs when the thread asks for
    /// it or the resync interval has passed, re-evaluates the role,
    /// publishes a heartbeat when due, and posts a role change task on a
    /// transition.
    pub async fn poll_relay_link(&self) -> Result<LocalStatus, RelayError> {
        let initialized = self.state.lock().local.is_some();
        if !initialized {
            return self.init_relay_link().await;
        }

        let now = self.dal.now_ms();
        self.drain_queue();
        if self.resync_due(now) {
            self.resync(now).await?;
        }

        let (previous, local, heartbeat_due) = {
            let mut state = self.state.lock();
            let previous = state.local.clone();
            let (local, remote) =
                compute_link_status(&state.snapshot, &self.config, previous.as_ref(), now);
            state.local = Some(local.clone());
            state.remote = Some(remote);
            let heartbeat_due = state.last_heartbeat_ms.map_or(true, |last| {
                now - last >= self.config.heartbeat_interval().as_millis() as i64
            });
            (previous, local, heartbeat_due)
        };

        let transition = previous.as_ref().map(|p| p.role) != Some(local.role);
        if transition || heartbeat_due {
            self.publish_status(&local, ServerState::Running, false)
                .await?;
        }

        if transition {
            let from = previous
                .as_ref()
                .map(|p| p.role.to_string())
                .unwrap_or_else(|| "none".to_string());
            info!(
                "Server {} changed role {} -> {} ({})",
                local.server_number, from, local.role, local.reason
            );
            self.dal
                .pending_task()
                .submit_task(
                    NewPendingTask::new(OPCODE_ROLE_CHANGE, now)
                        .with_submit_id(LINK_SUBMIT_ID)
                        .with_details(json!({
                            "from": from,
                            "to": local.role.to_string(),
                            "reason": local.reason.to_string(),
                            "designated_primary": local.designated_primary,
                        })),
                )
                .await?;
        }

        Ok(local)
    }

    /// Light poll: drains the relay queue and recomputes the statuses
    /// without writing anything.
    ///
    /// The returned status is not recorded, so a transition seen here is
    /// still reported by the next full poll.
    pub fn poll_relay_link_no_prist(&self) -> Option<LocalStatus> {
        self.drain_queue();
        let now = self.dal.now_ms();
        let mut state = self.state.lock();
        let previous = state.local.clone()?;
        let (local, remote) =
            compute_link_status(&state.snapshot, &self.config, Some(&previous), now);
        state.remote = Some(remote);
        Some(local)
    }

    /// Makes this server the designated primary.
    ///
    /// Cancels waiting secondary-only tasks and returns how many were
    /// cancelled.
    pub async fn set_timeline_to_primary(&self) -> Result<usize, RelayError> {
        self.set_primary_server(
            self.config.server_number(),
            self.config.secondary_only_opcodes(),
        )
        .await
    }

    /// Makes the peer the designated primary.
    ///
    /// Cancels waiting primary-only tasks and returns how many were
    /// cancelled.
    pub async fn set_timeline_to_secondary(&self) -> Result<usize, RelayError> {
        self.set_primary_server(self.config.peer_server(), self.config.primary_only_opcodes())
            .await
    }

    async fn set_primary_server(
        &self,
        primary_server: u8,
        conflicting_opcodes: &[i32],
    ) -> Result<usize, RelayError> {
        let now = self.dal.now_ms();
        let command = PrimaryCommand {
            primary_server,
            command_time: now,
        };
        let written = self
            .dal
            .relay_item()
            .submit_payload(self.config.link_key(), &command, true, RelayStamp::forced(now))
            .await?;
        if let Some(item) = written {
            self.state.lock().snapshot.apply(item);
        }
        info!("Primary server set to {} by server {}", primary_server, self.config.server_number());

        let cancelled = self
            .dal
            .pending_task()
            .cancel_waiting_tasks(conflicting_opcodes)
            .await?;
        if cancelled > 0 {
            info!("Cancelled {} waiting tasks for the new role", cancelled);
        }

        self.poll_relay_link().await?;
        Ok(cancelled)
    }

    /// Announces this server is shutting down so the peer can take over,
    /// then stops the relay thread.
    pub async fn shutdown_relay_link(&self) -> Result<(), RelayError> {
        let local = self.state.lock().local.clone();
        if let Some(local) = local {
            self.publish_status(&local, ServerState::ShuttingDown, true)
                .await?;
        }
        self.thread.shutdown_relay_thread().await;
        info!("Relay link for server {} shut down", self.config.server_number());
        Ok(())
    }

    fn drain_queue(&self) {
        let items = self.thread.ri_queue_drain();
        if items.is_empty() {
            return;
        }
        debug!("Relay link applying {} queued items", items.len());
        apply_all(&mut self.state.lock().snapshot, items);
    }

    fn resync_due(&self, now: i64) -> bool {
        if self.thread.take_resync_request() {
            return true;
        }
        let interval = self.config.resync_interval().as_millis() as i64;
        self.state
            .lock()
            .last_resync_ms
            .map_or(true, |last| now - last >= interval)
    }

    async fn resync(&self, now: i64) -> Result<(), RelayError> {
        let lo = now.saturating_sub(self.config.resync_lookback().as_millis() as i64);
        let read_seq = self.dal.relay_item().current_change_seq().await?;
        let items = self.thread.run_fetch_and_sort(TimeRange::since(lo)).await?;
        let read = items.len();

        let mut state = self.state.lock();
        let dropped = state.snapshot.replace_window(Some(lo), items, read_seq);
        state.last_resync_ms = Some(now);
        debug!(
            "Relay link resync read {} items, dropped {} deleted items",
            read, dropped
        );
        Ok(())
    }

    async fn publish_status(
        &self,
        local: &LocalStatus,
        state: ServerState,
        f_force: bool,
    ) -> Result<(), RelayError> {
        let now = self.dal.now_ms();
        let status = ServerStatus {
            server_number: local.server_number,
            role: match state {
                ServerState::Running => local.role,
                ServerState::ShuttingDown => LinkRole::Secondary,
            },
            state,
            mode: local.mode,
            heartbeat_time: now,
            primary_since: local.primary_since,
        };
        // Stamped so a late heartbeat cannot replace a newer status
        let written = self
            .dal
            .relay_item()
            .submit_payload(
                &local.server_number.to_string(),
                &status,
                f_force,
                RelayStamp::forced(now),
            )
            .await?;

        let mut link_state = self.state.lock();
        link_state.last_heartbeat_ms = Some(now);
        match written {
            Some(item) => {
                link_state.snapshot.apply(item);
            }
            None => warn!(
                "Status write for server {} was superseded",
                local.server_number
            ),
        }
        Ok(())
    }
}

fn apply_all(snapshot: &mut RelaySnapshot, items: Vec<RelayItem>) {
    for item in items {
        snapshot.apply(item);
    }
}

impl std::fmt::Debug for RelayLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayLink")
            .field("server_number", &self.config.server_number())
            .field("mode", &self.config.mode())
            .field("local", &self.local_status())
            .finish()
    }
}
