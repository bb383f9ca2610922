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

//! Data access for relay items.
//!
//! `submit_relay_item` is the only write path and enforces the
//! last-writer-wins rule atomically: SQLite reads, compares and writes inside
//! one `IMMEDIATE` transaction, the memory store under its relay lock. Every
//! accepted write gets the next `change_seq`, which the change feed tails.

use diesel::prelude::*;
use diesel::sqlite::Sqlite;
use tracing::{debug, trace};

use super::models::{rows_into, RelayItemRow};
use super::DAL;
use crate::database::schema::{relay_feed_state, relay_items};
use crate::error::StoreError;
use crate::models::relay_item::{write_supersedes, RelayItem, RelayQuery, RelayStamp};
use crate::models::SortOrder;
use crate::relay::payload::{RelayKind, TypedPayload};

pub mod change_feed;

use change_feed::RelayChangeStream;

/// Data access object for relay items.
#[derive(Clone)]
pub struct RelayItemDAL<'a> {
    dal: &'a DAL,
}

impl<'a> RelayItemDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Writes a relay item under the last-writer-wins rule.
    ///
    /// Returns the stored item if the write was accepted, `Ok(None)` if an
    /// existing item dominates it.
    pub async fn submit_relay_item(
        &self,
        relay_id: &str,
        relay_time: i64,
        details: serde_json::Value,
        f_force: bool,
        relay_stamp: RelayStamp,
    ) -> Result<Option<RelayItem>, StoreError> {
        let stored = crate::dispatch_backend!(
            self.dal.backend(),
            self.dal.database.memory_store()?.submit_relay_item(
                relay_id,
                relay_time,
                relay_stamp,
                details,
                f_force
            ),
            self.submit_relay_item_sqlite(
                relay_id.to_string(),
                relay_time,
                details,
                f_force,
                relay_stamp
            )
            .await
        )?;

        match &stored {
            Some(item) => {
                metrics::counter!("aafs_relay_writes_total", "outcome" => "accepted").increment(1);
                debug!(
                    "Relay item '{}' written (time={}, stamp={}, seq={})",
                    item.relay_id, item.relay_time, item.relay_stamp, item.change_seq
                );
            }
            None => {
                metrics::counter!("aafs_relay_writes_total", "outcome" => "rejected").increment(1);
                trace!(
                    "Relay item '{}' write at time={} stamp={} lost to a newer value",
                    relay_id,
                    relay_time,
                    relay_stamp
                );
            }
        }
        Ok(stored)
    }

    async fn submit_relay_item_sqlite(
        &self,
        relay_id: String,
        relay_time: i64,
        details: serde_json::Value,
        f_force: bool,
        relay_stamp: RelayStamp,
    ) -> Result<Option<RelayItem>, StoreError> {
        let details = serde_json::to_string(&details)?;
        let conn = self.dal.database.get_sqlite_connection().await?;

        let row = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, StoreError, _>(|conn| {
                    let existing = relay_items::table
                        .find(relay_id.clone())
                        .first::<RelayItemRow>(conn)
                        .optional()?;
                    let exists = existing.is_some();
                    let existing = existing.map(RelayItem::try_from).transpose()?;

                    if !write_supersedes(existing.as_ref(), relay_time, relay_stamp, f_force) {
                        return Ok(None);
                    }

                    diesel::update(relay_feed_state::table.find(1))
                        .set(relay_feed_state::last_seq.eq(relay_feed_state::last_seq + 1))
                        .execute(conn)?;
                    let change_seq = relay_feed_state::table
                        .find(1)
                        .select(relay_feed_state::last_seq)
                        .first::<i64>(conn)?;

                    let row = RelayItemRow {
                        relay_id: relay_id.clone(),
                        relay_time,
                        relay_stamp: relay_stamp.value(),
                        details,
                        change_seq,
                    };

                    if exists {
                        diesel::update(relay_items::table.find(relay_id))
                            .set((
                                relay_items::relay_time.eq(row.relay_time),
                                relay_items::relay_stamp.eq(row.relay_stamp),
                                relay_items::details.eq(row.details.clone()),
                                relay_items::change_seq.eq(row.change_seq),
                            ))
                            .execute(conn)?;
                    } else {
                        diesel::insert_into(relay_items::table)
                            .values(&row)
                            .execute(conn)?;
                    }
                    Ok(Some(row))
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(RelayItem::try_from).transpose()
    }

    /// Writes a typed payload under `kind.relay_id(key)`, using the payload's
    /// own time as `relay_time`.
    pub async fn submit_payload<P: TypedPayload>(
        &self,
        key: &str,
        payload: &P,
        f_force: bool,
        relay_stamp: RelayStamp,
    ) -> Result<Option<RelayItem>, StoreError> {
        let details = serde_json::to_value(payload)?;
        self.submit_relay_item(
            &P::KIND.relay_id(key),
            payload.relay_time(),
            details,
            f_force,
            relay_stamp,
        )
        .await
    }

    /// Fetches one item by id.
    pub async fn get_relay_item(&self, relay_id: &str) -> Result<Option<RelayItem>, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.dal.database.memory_store()?.get_relay_item(relay_id),
            self.get_relay_item_sqlite(relay_id.to_string()).await
        )
    }

    async fn get_relay_item_sqlite(&self, relay_id: String) -> Result<Option<RelayItem>, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        let row = conn
            .interact(move |conn| {
                relay_items::table
                    .find(relay_id)
                    .first::<RelayItemRow>(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(RelayItem::try_from).transpose()
    }

    /// Returns items matching `query`, ordered by `(relay_time, relay_id)` in
    /// the query's direction.
    pub async fn get_relay_item_range(
        &self,
        query: &RelayQuery,
    ) -> Result<Vec<RelayItem>, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.dal.database.memory_store()?.query_relay_items(query),
            self.get_relay_item_range_sqlite(query.clone()).await
        )
    }

    async fn get_relay_item_range_sqlite(
        &self,
        query: RelayQuery,
    ) -> Result<Vec<RelayItem>, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        let rows = conn
            .interact(move |conn| {
                let mut select = filtered(&query);
                select = match query.order {
                    SortOrder::Ascending => {
                        select.order_by((relay_items::relay_time.asc(), relay_items::relay_id.asc()))
                    }
                    SortOrder::Descending => select
                        .order_by((relay_items::relay_time.desc(), relay_items::relay_id.desc())),
                };
                if let Some(limit) = query.limit {
                    select = select.limit(limit);
                }
                select.load::<RelayItemRow>(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        rows_into(rows)
    }

    /// Items of `kind` for the given event ids, most recent first.
    ///
    /// An empty `event_ids` returns every item of that kind.
    pub async fn get_relay_items(
        &self,
        kind: RelayKind,
        event_ids: &[String],
    ) -> Result<Vec<RelayItem>, StoreError> {
        let query = RelayQuery::all()
            .with_prefix(kind.prefix())
            .with_ids(event_ids.iter().map(|e| kind.relay_id(e)))
            .descending();
        self.get_relay_item_range(&query).await
    }

    /// The most recent item of `kind` for the given event ids.
    pub async fn get_first_relay_item(
        &self,
        kind: RelayKind,
        event_ids: &[String],
    ) -> Result<Option<RelayItem>, StoreError> {
        let query = RelayQuery::all()
            .with_prefix(kind.prefix())
            .with_ids(event_ids.iter().map(|e| kind.relay_id(e)))
            .descending()
            .limit(1);
        Ok(self.get_relay_item_range(&query).await?.into_iter().next())
    }

    pub async fn get_pdl_completion_relay_items(
        &self,
        event_ids: &[String],
    ) -> Result<Vec<RelayItem>, StoreError> {
        self.get_relay_items(RelayKind::PdlCompletion, event_ids)
            .await
    }

    pub async fn get_first_pdl_completion_relay_item(
        &self,
        event_ids: &[String],
    ) -> Result<Option<RelayItem>, StoreError> {
        self.get_first_relay_item(RelayKind::PdlCompletion, event_ids)
            .await
    }

    pub async fn get_pdl_removal_relay_items(
        &self,
        event_ids: &[String],
    ) -> Result<Vec<RelayItem>, StoreError> {
        self.get_relay_items(RelayKind::PdlRemoval, event_ids).await
    }

    pub async fn get_first_pdl_removal_relay_item(
        &self,
        event_ids: &[String],
    ) -> Result<Option<RelayItem>, StoreError> {
        self.get_first_relay_item(RelayKind::PdlRemoval, event_ids)
            .await
    }

    pub async fn get_pdl_foreign_relay_items(
        &self,
        event_ids: &[String],
    ) -> Result<Vec<RelayItem>, StoreError> {
        self.get_relay_items(RelayKind::PdlForeign, event_ids).await
    }

    pub async fn get_first_pdl_foreign_relay_item(
        &self,
        event_ids: &[String],
    ) -> Result<Option<RelayItem>, StoreError> {
        self.get_first_relay_item(RelayKind::PdlForeign, event_ids)
            .await
    }

    pub async fn get_analyst_selection_relay_items(
        &self,
        event_ids: &[String],
    ) -> Result<Vec<RelayItem>, StoreError> {
        self.get_relay_items(RelayKind::AnalystSelection, event_ids)
            .await
    }

    pub async fn get_first_analyst_selection_relay_item(
        &self,
        event_ids: &[String],
    ) -> Result<Option<RelayItem>, StoreError> {
        self.get_first_relay_item(RelayKind::AnalystSelection, event_ids)
            .await
    }

    /// Deletes one item. Returns whether it existed.
    pub async fn delete_relay_item(&self, relay_id: &str) -> Result<bool, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.dal.database.memory_store()?.delete_relay_item(relay_id),
            self.delete_relay_item_sqlite(relay_id.to_string()).await
        )
    }

    async fn delete_relay_item_sqlite(&self, relay_id: String) -> Result<bool, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        let deleted = conn
            .interact(move |conn| diesel::delete(relay_items::table.find(relay_id)).execute(conn))
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(deleted > 0)
    }

    /// Deletes every item matching `query`. Ordering and limit are ignored.
    pub async fn delete_relay_item_range(&self, query: &RelayQuery) -> Result<usize, StoreError> {
        let mut query = query.clone();
        query.limit = None;

        crate::dispatch_backend!(
            self.dal.backend(),
            self.dal.database.memory_store()?.delete_relay_items(&query),
            self.delete_relay_item_range_sqlite(query).await
        )
    }

    async fn delete_relay_item_range_sqlite(&self, query: RelayQuery) -> Result<usize, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        let deleted = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                    let ids: Vec<String> = filtered(&query)
                        .select(relay_items::relay_id)
                        .load::<String>(conn)?;
                    diesel::delete(relay_items::table.filter(relay_items::relay_id.eq_any(ids)))
                        .execute(conn)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        debug!("Deleted {} relay items", deleted);
        Ok(deleted)
    }

    /// Items written after `change_seq`, in commit order.
    pub async fn get_relay_items_after_seq(
        &self,
        change_seq: i64,
        limit: i64,
    ) -> Result<Vec<RelayItem>, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            {
                let mut items = self
                    .dal
                    .database
                    .memory_store()?
                    .query_relay_items(&RelayQuery::all())?;
                items.retain(|i| i.change_seq > change_seq);
                items.sort_by_key(|i| i.change_seq);
                items.truncate(limit.max(0) as usize);
                Ok(items)
            },
            self.get_relay_items_after_seq_sqlite(change_seq, limit)
                .await
        )
    }

    async fn get_relay_items_after_seq_sqlite(
        &self,
        change_seq: i64,
        limit: i64,
    ) -> Result<Vec<RelayItem>, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        let rows = conn
            .interact(move |conn| {
                relay_items::table
                    .filter(relay_items::change_seq.gt(change_seq))
                    .order_by(relay_items::change_seq.asc())
                    .limit(limit)
                    .load::<RelayItemRow>(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        rows_into(rows)
    }

    /// The highest `change_seq` handed out so far.
    pub async fn current_change_seq(&self) -> Result<i64, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.dal.database.memory_store()?.last_change_seq(),
            self.current_change_seq_sqlite().await
        )
    }

    async fn current_change_seq_sqlite(&self) -> Result<i64, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        let seq = conn
            .interact(|conn| {
                relay_feed_state::table
                    .find(1)
                    .select(relay_feed_state::last_seq)
                    .first::<i64>(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(seq.unwrap_or(0))
    }

    /// Opens a live subscription to accepted relay writes.
    ///
    /// Only writes committed after this call are delivered. Delivery is best
    /// effort; callers that need completeness pair the stream with a
    /// fetch-and-sort over the time window they care about.
    pub async fn watch_relay_item_changes(&self) -> Result<RelayChangeStream, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            Ok(RelayChangeStream::memory(
                self.dal.database.memory_store()?.subscribe_relay_changes()?
            )),
            {
                let cursor = self.current_change_seq().await?;
                Ok(RelayChangeStream::polling(self.dal.clone(), cursor))
            }
        )
    }
}

/// Unordered select over `relay_items` with the query's filters applied.
fn filtered(query: &RelayQuery) -> relay_items::BoxedQuery<'static, Sqlite> {
    let mut select = relay_items::table.into_boxed();

    if let Some(lo) = query.time_range.lo {
        select = select.filter(relay_items::relay_time.ge(lo));
    }
    if let Some(hi) = query.time_range.hi {
        select = select.filter(relay_items::relay_time.lt(hi));
    }
    if let Some(prefix) = &query.id_prefix {
        let pattern = format!("{}%", escape_like(prefix));
        select = select.filter(relay_items::relay_id.like(pattern).escape('\\'));
    }
    if !query.relay_ids.is_empty() {
        select = select.filter(relay_items::relay_id.eq_any(query.relay_ids.clone()));
    }

    select
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
