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

//! # AAFS coordination layer
//!
//! Durable work scheduling and inter-server coordination for a pair of
//! redundant aftershock forecasting servers sharing one document store.
//!
//! The crate is organised around two cooperating subsystems:
//!
//! - **Pending task queue** ([`dal::PendingTaskDAL`]) and the
//!   [`dispatcher::TaskDispatcher`] that claims and executes tasks in
//!   `(sched_time, submit_time)` order. Every piece of server activity is a
//!   task, so the queue is the only driver of work.
//! - **Relay items** ([`dal::RelayItemDAL`]), a last-writer-wins register per
//!   relay id with a live change feed. The [`relay::RelayThread`] mirrors the
//!   feed into a local queue and the [`relay::RelayLink`] uses it to decide
//!   which server is primary.
//!
//! # Example
//!
//! ```rust,ignore
//! use aafs::dal::DAL;
//! use aafs::database::Database;
//! use aafs::dispatcher::{HandlerRegistry, TaskDispatcher, DispatcherConfig};
//!
//! let database = Database::try_new("sqlite://aafs.db", 1)?;
//! database.run_migrations().await?;
//! let dal = DAL::new(database);
//!
//! let dispatcher = TaskDispatcher::new(dal, HandlerRegistry::new(), DispatcherConfig::default());
//! while dispatcher.run_next_task(true, false, None).await? {}
//! ```

pub mod clock;
pub mod config;
pub mod dal;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod models;
pub mod relay;

pub use clock::{FrozenClock, ServerClock, SharedClock, SystemClock};
pub use dal::DAL;
pub use database::{BackendType, Database};
pub use dispatcher::{
    DispatchContext, DispatcherConfig, HandlerRegistry, TaskDispatcher, TaskHandler, TaskOutcome,
};
pub use error::{DispatchError, HandlerError, RelayError, StoreError};
pub use logging::init_logging;
pub use models::pending_task::{NewPendingTask, PendingTask};
pub use models::relay_item::{RelayItem, RelayStamp};
pub use relay::{RelayLink, RelayLinkConfig, RelayThread};
