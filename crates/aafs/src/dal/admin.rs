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

//! Administrative store operations.
//!
//! These bypass the claim protocol and are meant for operators, not for the
//! running server.

use diesel::prelude::*;
use tracing::{info, warn};

use super::DAL;
use crate::database::schema::{pending_tasks, relay_items};
use crate::error::StoreError;

/// Phrase that must be supplied verbatim to [`AdminDAL::drop_all`].
pub const DROP_ALL_CONFIRMATION: &str = "erase all pending tasks and relay items";

/// Secondary indexes as `(name, definition)`.
const SQLITE_INDEXES: &[(&str, &str)] = &[
    (
        "idx_pending_tasks_ready",
        "pending_tasks (sched_time, submit_time, id)",
    ),
    ("idx_pending_tasks_event", "pending_tasks (event_id, sched_time)"),
    ("idx_relay_items_time", "relay_items (relay_time, relay_id)"),
    ("idx_relay_items_change_seq", "relay_items (change_seq)"),
];

/// Data access object for administrative operations.
#[derive(Clone)]
pub struct AdminDAL<'a> {
    dal: &'a DAL,
}

impl<'a> AdminDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Deletes every pending task and relay item, then rebuilds indexes.
    ///
    /// Refuses unless `confirmation` equals [`DROP_ALL_CONFIRMATION`].
    pub async fn drop_all(&self, confirmation: &str) -> Result<(), StoreError> {
        if confirmation != DROP_ALL_CONFIRMATION {
            return Err(StoreError::ConfirmationRequired {
                operation: "drop all collections".to_string(),
            });
        }

        warn!("Dropping all pending tasks and relay items");
        crate::dispatch_backend!(
            self.dal.backend(),
            self.dal.database.memory_store()?.clear(),
            self.drop_all_sqlite().await
        )?;

        self.drop_indexes().await?;
        self.make_indexes().await?;
        info!("Store emptied");
        Ok(())
    }

    async fn drop_all_sqlite(&self) -> Result<(), StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        conn.interact(|conn| {
            conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                diesel::delete(pending_tasks::table).execute(conn)?;
                // relay_feed_state is left alone so live tails never see a reused sequence number
                diesel::delete(relay_items::table).execute(conn)?;
                Ok(())
            })
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    /// Drops secondary indexes. A no-op for the memory store.
    pub async fn drop_indexes(&self) -> Result<(), StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            Ok(()),
            self.run_index_statements(
                SQLITE_INDEXES
                    .iter()
                    .map(|(name, _)| format!("DROP INDEX IF EXISTS {}", name))
                    .collect()
            )
            .await
        )
    }

    /// Creates any missing secondary indexes. A no-op for the memory store.
    pub async fn make_indexes(&self) -> Result<(), StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            Ok(()),
            self.run_index_statements(
                SQLITE_INDEXES
                    .iter()
                    .map(|(name, def)| format!("CREATE INDEX IF NOT EXISTS {} ON {}", name, def))
                    .collect()
            )
            .await
        )
    }

    async fn run_index_statements(&self, statements: Vec<String>) -> Result<(), StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        conn.interact(move |conn| {
            for statement in &statements {
                diesel::sql_query(statement.as_str()).execute(conn)?;
            }
            Ok::<_, diesel::result::Error>(())
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(())
    }
}
