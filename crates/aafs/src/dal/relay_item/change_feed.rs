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

//! Live subscription to accepted relay writes.
//!
//! The memory backend forwards its broadcast channel. SQLite has no change
//! notification, so the stream tails `change_seq`, polling when it has caught
//! up. Both are best effort: a lagging memory subscriber gets
//! [`StoreError::FeedLagged`] and a closed feed yields `None`, after which the
//! caller is expected to resubscribe and reconcile with a fetch-and-sort.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

use crate::dal::DAL;
use crate::error::StoreError;
use crate::models::relay_item::RelayItem;

/// How often a caught-up SQLite stream checks for new writes.
const SQLITE_FEED_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Rows fetched per SQLite poll.
const SQLITE_FEED_BATCH: i64 = 256;

enum FeedSource {
    Memory(broadcast::Receiver<RelayItem>),
    Polling {
        dal: DAL,
        cursor: i64,
        buffer: VecDeque<RelayItem>,
        poll_interval: Duration,
    },
    Closed,
}

/// A scoped change feed subscription.
///
/// The subscription is released when the stream is closed or dropped.
pub struct RelayChangeStream {
    source: FeedSource,
}

impl RelayChangeStream {
    pub(crate) fn memory(receiver: broadcast::Receiver<RelayItem>) -> Self {
        Self {
            source: FeedSource::Memory(receiver),
        }
    }

    pub(crate) fn polling(dal: DAL, cursor: i64) -> Self {
        Self {
            source: FeedSource::Polling {
                dal,
                cursor,
                buffer: VecDeque::new(),
                poll_interval: SQLITE_FEED_POLL_INTERVAL,
            },
        }
    }

    /// Overrides how often a polling stream checks for new writes.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        if let FeedSource::Polling { poll_interval, .. } = &mut self.source {
            *poll_interval = interval;
        }
        self
    }

    /// Waits for the next accepted write.
    ///
    /// Returns `Ok(None)` once the feed is closed. Cancel safe: dropping the
    /// future between writes loses nothing.
    pub async fn next(&mut self) -> Result<Option<RelayItem>, StoreError> {
        match &mut self.source {
            FeedSource::Closed => Ok(None),
            FeedSource::Memory(receiver) => match receiver.recv().await {
                Ok(item) => Ok(Some(item)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    Err(StoreError::FeedLagged(skipped))
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Relay change feed closed by the store");
                    self.source = FeedSource::Closed;
                    Ok(None)
                }
            },
            FeedSource::Polling {
                dal,
                cursor,
                buffer,
                poll_interval,
            } => loop {
                if let Some(item) = buffer.pop_front() {
                    return Ok(Some(item));
                }

                let batch = dal
                    .relay_item()
                    .get_relay_items_after_seq(*cursor, SQLITE_FEED_BATCH)
                    .await?;

                match batch.last() {
                    Some(last) => {
                        *cursor = last.change_seq;
                        buffer.extend(batch);
                    }
                    None => tokio::time::sleep(*poll_interval).await,
                }
            },
        }
    }

    /// Ends the subscription. Further calls to `next` return `Ok(None)`.
    pub fn close(&mut self) {
        self.source = FeedSource::Closed;
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.source, FeedSource::Closed)
    }
}

impl std::fmt::Debug for RelayChangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.source {
            FeedSource::Memory(_) => "memory".to_string(),
            FeedSource::Polling { cursor, .. } => format!("polling(cursor={})", cursor),
            FeedSource::Closed => "closed".to_string(),
        };
        f.debug_struct("RelayChangeStream")
            .field("source", &source)
            .finish()
    }
}
