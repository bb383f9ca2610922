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

//! Data access layer with runtime backend selection.
//!
//! Each entity accessor (`dal.pending_task()`, `dal.relay_item()`,
//! `dal.admin()`) borrows the [`DAL`] and dispatches every operation to the
//! memory or SQLite implementation based on the database backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use aafs::dal::DAL;
//! use aafs::database::Database;
//!
//! let dal = DAL::new(Database::try_new("memory://")?);
//! let task = dal
//!     .pending_task()
//!     .submit_task(NewPendingTask::new(101, 0).with_event_id("us6000abcd"))
//!     .await?;
//! ```

use std::sync::Arc;

use crate::clock::{SharedClock, SystemClock};
use crate::database::{AnyPool, BackendType, Database};

pub mod admin;
pub mod models;
pub mod pending_task;
pub mod relay_item;

pub use admin::{AdminDAL, DROP_ALL_CONFIRMATION};
pub use pending_task::{PendingTaskCursor, PendingTaskDAL};
pub use relay_item::change_feed::RelayChangeStream;
pub use relay_item::RelayItemDAL;

/// Dispatches to the memory or SQLite implementation of an operation.
///
/// # Example
///
/// ```rust,ignore
/// dispatch_backend!(
///     self.dal.backend(),
///     self.submit_task_memory(task),
///     self.submit_task_sqlite(task).await
/// )
/// ```
#[macro_export]
macro_rules! dispatch_backend {
    ($backend:expr, $memory:expr, $sqlite:expr) => {
        match $backend {
            $crate::database::BackendType::Memory => $memory,
            $crate::database::BackendType::Sqlite => $sqlite,
        }
    };
}

/// The data access layer.
///
/// `Clone` and cheap to share; clones reference the same store and clock.
#[derive(Clone, Debug)]
pub struct DAL {
    /// The database instance with connection pool
    pub database: Database,
    clock: SharedClock,
}

impl DAL {
    /// Creates a DAL that reads time from the wall clock.
    pub fn new(database: Database) -> Self {
        Self::with_clock(database, Arc::new(SystemClock))
    }

    /// Creates a DAL with an injected clock.
    pub fn with_clock(database: Database, clock: SharedClock) -> Self {
        DAL { database, clock }
    }

    pub fn backend(&self) -> BackendType {
        self.database.backend()
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn pool(&self) -> AnyPool {
        self.database.pool()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Current server time in milliseconds.
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Returns the pending task queue accessor.
    pub fn pending_task(&self) -> PendingTaskDAL<'_> {
        PendingTaskDAL::new(self)
    }

    /// Returns the relay item store accessor.
    pub fn relay_item(&self) -> RelayItemDAL<'_> {
        RelayItemDAL::new(self)
    }

    /// Returns the administrative accessor.
    pub fn admin(&self) -> AdminDAL<'_> {
        AdminDAL::new(self)
    }
}
