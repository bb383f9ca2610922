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

//! Injectable server clock.
//!
//! Everything that reads "now" goes through a [`ServerClock`] so that tests and
//! replay runs can freeze or fast-forward time. The dispatcher may also move the
//! clock forward to a task's scheduled time when running in accelerated mode.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Source of the current server time, in milliseconds since the epoch.
pub trait ServerClock: Send + Sync + Debug {
    /// Returns the current time.
    fn now_ms(&self) -> i64;

    /// Requests that the clock move forward to `time_ms`.
    ///
    /// Wall clocks ignore this. Clocks that support it never move backwards.
    fn adjust_to(&self, _time_ms: i64) {}
}

/// Shared handle to a clock.
pub type SharedClock = Arc<dyn ServerClock>;

/// The wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl ServerClock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FrozenClock {
    time_ms: AtomicI64,
}

impl FrozenClock {
    pub fn new(time_ms: i64) -> Self {
        Self {
            time_ms: AtomicI64::new(time_ms),
        }
    }

    pub fn shared(time_ms: i64) -> Arc<Self> {
        Arc::new(Self::new(time_ms))
    }

    /// Sets the clock to an arbitrary time, including backwards.
    pub fn set(&self, time_ms: i64) {
        self.time_ms.store(time_ms, Ordering::SeqCst);
    }

    /// Moves the clock forward by `delta_ms` and returns the new time.
    pub fn advance(&self, delta_ms: i64) -> i64 {
        self.time_ms.fetch_add(delta_ms, Ordering::SeqCst) + delta_ms
    }
}

impl ServerClock for FrozenClock {
    fn now_ms(&self) -> i64 {
        self.time_ms.load(Ordering::SeqCst)
    }

    fn adjust_to(&self, time_ms: i64) {
        self.time_ms.fetch_max(time_ms, Ordering::SeqCst);
    }
}
