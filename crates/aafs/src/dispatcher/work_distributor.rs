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

//! Wake-up policy for the dispatch loop.
//!
//! Neither backend pushes "task ready" notifications across processes, so
//! the loop polls. Tasks posted through the same dispatcher wake it
//! immediately via [`WorkDistributor::notify_work`].

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// Abstracts how the dispatch loop waits for work.
#[async_trait]
pub trait WorkDistributor: Send + Sync {
    /// Waits until work might be available, or a poll interval elapses.
    ///
    /// The caller should attempt to activate a task after this returns and
    /// handle finding nothing.
    async fn wait_for_work(&self);

    /// Signals that work was just posted.
    fn notify_work(&self);

    /// Stops waiting. After this, `wait_for_work` returns promptly.
    fn shutdown(&self);
}

/// Periodic polling with an in-process wake-up.
pub struct PollingDistributor {
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl PollingDistributor {
    const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

    pub fn new() -> Self {
        Self::with_poll_interval(Self::DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }
}

impl Default for PollingDistributor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkDistributor for PollingDistributor {
    async fn wait_for_work(&self) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => {
                trace!("Poll interval elapsed");
            }
            _ = self.notify.notified() => {
                trace!("Woken by work notification");
            }
        }
    }

    fn notify_work(&self) {
        // notify_one stores a permit, so a post that races ahead of the wait is not lost
        self.notify.notify_one();
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}
