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

//! Background relay thread.
//!
//! The thread owns one change feed subscription at a time and pushes every
//! accepted relay write it receives onto a queue that survives stop and
//! restart. When the subscription ends (lag, store reset, outage) the thread
//! resubscribes after a short delay and raises the resync flag: writes made
//! while it was not subscribed are only recoverable through
//! [`RelayThread::run_fetch_and_sort`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dal::DAL;
use crate::error::StoreError;
use crate::models::relay_item::{RelayItem, RelayQuery};
use crate::models::TimeRange;

const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    dal: DAL,
    resubscribe_delay: Duration,
    queue: Mutex<VecDeque<RelayItem>>,
    worker: Mutex<Option<Worker>>,
    resync_requested: AtomicBool,
}

/// Handle to the relay thread. Clones share the same thread and queue.
#[derive(Clone)]
pub struct RelayThread {
    inner: Arc<Inner>,
}

impl RelayThread {
    pub fn new(dal: DAL) -> Self {
        Self::with_resubscribe_delay(dal, DEFAULT_RESUBSCRIBE_DELAY)
    }

    pub fn with_resubscribe_delay(dal: DAL, resubscribe_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                dal,
                resubscribe_delay,
                queue: Mutex::new(VecDeque::new()),
                worker: Mutex::new(None),
                resync_requested: AtomicBool::new(false),
            }),
        }
    }

    /// Starts the background task if it is not already running.
    ///
    /// Returns `false` only when called outside a tokio runtime.
    pub fn start_relay_thread(&self) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            warn!("Cannot start relay thread outside a tokio runtime");
            return false;
        };

        let mut worker = self.inner.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return true;
        }

        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let token = cancel.clone();
        let handle = runtime.spawn(async move { inner.run(token).await });
        *worker = Some(Worker { cancel, handle });
        true
    }

    /// Stops the background task and waits for it to finish.
    ///
    /// Queued items are kept.
    pub async fn shutdown_relay_thread(&self) {
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                warn!("Relay thread ended abnormally: {}", e);
            }
        }
    }

    /// Signals the background task to stop without waiting for it.
    fn stop(&self) {
        if let Some(worker) = self.inner.worker.lock().take() {
            worker.cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Takes the oldest queued item.
    pub fn ri_queue_remove(&self) -> Option<RelayItem> {
        self.inner.queue.lock().pop_front()
    }

    /// Takes every queued item, oldest first.
    pub fn ri_queue_drain(&self) -> Vec<RelayItem> {
        self.inner.queue.lock().drain(..).collect()
    }

    pub fn ri_queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Returns and clears the resync flag.
    ///
    /// The flag is raised every time the thread (re)subscribes to the change
    /// feed; the caller should then reconcile with [`Self::run_fetch_and_sort`].
    pub fn take_resync_request(&self) -> bool {
        self.inner.resync_requested.swap(false, Ordering::SeqCst)
    }

    /// Reads every relay item in `range`, ordered by `(relay_time, relay_id)`.
    pub async fn run_fetch_and_sort(&self, range: TimeRange) -> Result<Vec<RelayItem>, StoreError> {
        let mut items = self
            .inner
            .dal
            .relay_item()
            .get_relay_item_range(&RelayQuery::all().in_range(range))
            .await?;
        items.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(items)
    }

    /// Returns a guard that stops the thread when dropped.
    pub fn sentinel(&self) -> RelaySentinel {
        RelaySentinel {
            thread: self.clone(),
        }
    }
}

impl std::fmt::Debug for RelayThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayThread")
            .field("running", &self.is_running())
            .field("queued", &self.ri_queue_len())
            .finish()
    }
}

impl Inner {
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Relay thread started");

        'subscribe: while !cancel.is_cancelled() {
            match self.dal.relay_item().watch_relay_item_changes().await {
                Ok(mut stream) => {
                    self.resync_requested.store(true, Ordering::SeqCst);
                    debug!("Relay thread subscribed to change feed");

                    loop {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                stream.close();
                                break 'subscribe;
                            }
                            next = stream.next() => match next {
                                Ok(Some(item)) => {
                                    self.queue.lock().push_back(item);
                                }
                                Ok(None) => {
                                    warn!("Relay change feed closed; resubscribing");
                                    break;
                                }
                                Err(e) => {
                                    warn!("Relay change feed failed: {}; resubscribing", e);
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => warn!("Relay subscription failed: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.resubscribe_delay) => {}
            }
        }

        info!("Relay thread stopped");
    }
}

/// Stops the relay thread when dropped.
///
/// The stop is signalled, not awaited; use
/// [`RelayThread::shutdown_relay_thread`] to wait for the task to finish.
pub struct RelaySentinel {
    thread: RelayThread,
}

impl Drop for RelaySentinel {
    fn drop(&mut self) {
        self.thread.stop();
    }
}
