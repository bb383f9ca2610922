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

//! Database handle and backend detection.
//!
//! # Example
//!
//! ```rust,ignore
//! use aafs::database::Database;
//!
//! // Shared in-process store
//! let db = Database::try_new("memory://")?;
//!
//! // SQLite file
//! let db = Database::try_new("sqlite:///var/lib/aafs/aafs.db")?;
//! db.run_migrations().await?;
//! ```

use std::sync::Arc;

use deadpool_diesel::sqlite::{
    Manager as SqliteManager, Pool as SqlitePool, Runtime as SqliteRuntime,
};
use tracing::{debug, info};

use super::memory::MemoryStore;
use crate::error::StoreError;

/// Busy timeout applied to SQLite connections, in milliseconds.
const SQLITE_BUSY_TIMEOUT_MS: u32 = 30_000;

/// The store backend in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// In-process memory store
    Memory,
    /// SQLite via diesel
    Sqlite,
}

impl BackendType {
    /// Detect the backend type from a connection string.
    ///
    /// SQLite accepts `sqlite://`, `file:` URIs, absolute or relative paths,
    /// `:memory:`, and names ending in `.db`, `.sqlite` or `.sqlite3`.
    pub fn from_url(url: &str) -> Result<Self, StoreError> {
        if url.starts_with("memory://") {
            return Ok(BackendType::Memory);
        }

        if url.starts_with("sqlite://")
            || url.starts_with("file:")
            || url.starts_with('/')
            || url.starts_with("./")
            || url.starts_with("../")
            || url == ":memory:"
            || url.ends_with(".db")
            || url.ends_with(".sqlite")
            || url.ends_with(".sqlite3")
        {
            return Ok(BackendType::Sqlite);
        }

        Err(StoreError::UnsupportedUrl(url.to_string()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Memory => "memory",
            BackendType::Sqlite => "sqlite",
        }
    }
}

/// The underlying store handle.
#[derive(Clone)]
pub enum AnyPool {
    Memory(Arc<MemoryStore>),
    Sqlite(SqlitePool),
}

impl std::fmt::Debug for AnyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnyPool::Memory(_) => write!(f, "AnyPool::Memory"),
            AnyPool::Sqlite(pool) => {
                write!(f, "AnyPool::Sqlite(max_size={})", pool.status().max_size)
            }
        }
    }
}

impl AnyPool {
    pub fn as_memory(&self) -> Option<&Arc<MemoryStore>> {
        match self {
            AnyPool::Memory(store) => Some(store),
            _ => None,
        }
    }

    pub fn as_sqlite(&self) -> Option<&SqlitePool> {
        match self {
            AnyPool::Sqlite(pool) => Some(pool),
            _ => None,
        }
    }
}

/// Handle to the shared store.
///
/// Cheap to clone; clones share the same pool or memory store.
#[derive(Clone, Debug)]
pub struct Database {
    pool: AnyPool,
    backend: BackendType,
}

impl Database {
    /// Creates a database with a fresh memory store.
    pub fn in_memory() -> Self {
        Self {
            pool: AnyPool::Memory(Arc::new(MemoryStore::new())),
            backend: BackendType::Memory,
        }
    }

    /// Creates a database from a connection string.
    ///
    /// SQLite migrations are not applied here; call [`Database::run_migrations`].
    pub fn try_new(connection_string: &str) -> Result<Self, StoreError> {
        match BackendType::from_url(connection_string)? {
            BackendType::Memory => {
                info!("Using in-process memory store");
                Ok(Self::in_memory())
            }
            BackendType::Sqlite => {
                let connection_url = Self::build_sqlite_url(connection_string);
                let manager = SqliteManager::new(connection_url.clone(), SqliteRuntime::Tokio1);
                // SQLite serialises writers; a single pooled connection keeps
                // claims from tripping over "database is locked" within one process.
                let sqlite_pool_size = 1;
                let pool = SqlitePool::builder(manager)
                    .max_size(sqlite_pool_size)
                    .build()
                    .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

                info!(
                    "SQLite connection pool initialized for '{}' (size: {})",
                    connection_url, sqlite_pool_size
                );

                Ok(Self {
                    pool: AnyPool::Sqlite(pool),
                    backend: BackendType::Sqlite,
                })
            }
        }
    }

    /// Returns the backend type for this database.
    pub fn backend(&self) -> BackendType {
        self.backend
    }

    /// Returns a clone of the store handle.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    fn build_sqlite_url(connection_string: &str) -> String {
        if let Some(path) = connection_string.strip_prefix("sqlite://") {
            path.to_string()
        } else {
            connection_string.to_string()
        }
    }

    /// Returns the memory store, or an error on the SQLite backend.
    pub fn memory_store(&self) -> Result<&Arc<MemoryStore>, StoreError> {
        self.pool
            .as_memory()
            .ok_or(StoreError::BackendMismatch { expected: "memory" })
    }

    /// Gets a pooled SQLite connection.
    pub async fn get_sqlite_connection(
        &self,
    ) -> Result<deadpool::managed::Object<SqliteManager>, StoreError> {
        let pool = self
            .pool
            .as_sqlite()
            .ok_or(StoreError::BackendMismatch { expected: "sqlite" })?;

        pool.get()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))
    }

    /// Applies pending migrations. A no-op for the memory store.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        use diesel::prelude::*;
        use diesel_migrations::MigrationHarness;

        let conn = match &self.pool {
            AnyPool::Memory(_) => {
                debug!("Memory store needs no migrations");
                return Ok(());
            }
            AnyPool::Sqlite(_) => self.get_sqlite_connection().await?,
        };

        conn.interact(|conn| -> Result<(), StoreError> {
            // WAL lets readers proceed while a claim transaction holds the write lock
            diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
            diesel::sql_query(format!("PRAGMA busy_timeout={};", SQLITE_BUSY_TIMEOUT_MS))
                .execute(conn)?;

            conn.run_pending_migrations(super::SQLITE_MIGRATIONS)
                .map_err(|e| StoreError::Migration(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        info!("SQLite migrations applied");
        Ok(())
    }
}
