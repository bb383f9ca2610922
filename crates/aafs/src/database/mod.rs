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

//! Store access: backend selection, pooled SQLite connections and the
//! in-process memory store.
//!
//! Two backends are supported, chosen from the connection string:
//!
//! - `memory://` runs against a [`MemoryStore`] owned by the [`Database`].
//!   Clones of a `Database` share the same store, which is how tests stand up
//!   two servers over one store.
//! - SQLite (`sqlite://path`, plain file paths, `:memory:`) goes through
//!   `deadpool-diesel` with embedded migrations.

pub mod connection;
pub mod memory;
pub mod schema;

pub use connection::{AnyPool, BackendType, Database};
pub use memory::MemoryStore;

use diesel_migrations::{embed_migrations, EmbeddedMigrations};

/// Embedded SQLite migrations.
pub const SQLITE_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/sqlite");
