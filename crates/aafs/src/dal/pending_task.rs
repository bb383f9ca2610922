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

//! Data access for the pending task queue.
//!
//! Plain CRUD and range queries live here; the claim protocol (activate,
//! stage, delete under a claim, and claim recovery) is in [`claiming`].

use std::collections::VecDeque;

use diesel::prelude::*;
use diesel::sqlite::Sqlite;
use tracing::debug;
use uuid::Uuid;

use super::models::{rows_into, PendingTaskRow};
use super::DAL;
use crate::database::schema::pending_tasks;
use crate::error::StoreError;
use crate::models::pending_task::{NewPendingTask, PendingTask, TaskOrderKey, TaskQuery};
use crate::models::SortOrder;

pub mod claiming;

/// Rows fetched per round trip by [`PendingTaskCursor`].
const CURSOR_PAGE_SIZE: i64 = 100;

/// Data access object for pending tasks.
#[derive(Clone)]
pub struct PendingTaskDAL<'a> {
    dal: &'a DAL,
}

impl<'a> PendingTaskDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Stores a new task, stamping `submit_time` from the server clock if unset.
    pub async fn submit_task(&self, new_task: NewPendingTask) -> Result<PendingTask, StoreError> {
        let task = new_task.into_task(self.dal.now_ms());
        debug!(
            "Submitting task {} (opcode={}, event_id='{}', sched_time={})",
            task.id, task.opcode, task.event_id, task.sched_time
        );
        crate::dispatch_backend!(
            self.dal.backend(),
            self.dal.database.memory_store()?.insert_task(task),
            self.submit_task_sqlite(task).await
        )
    }

    async fn submit_task_sqlite(&self, task: PendingTask) -> Result<PendingTask, StoreError> {
        let row = PendingTaskRow::try_from(&task)?;
        let conn = self.dal.database.get_sqlite_connection().await?;

        conn.interact(move |conn| {
            diesel::insert_into(pending_tasks::table)
                .values(&row)
                .execute(conn)
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(task)
    }

    /// Fetches a task by id.
    pub async fn get_task(&self, id: Uuid) -> Result<Option<PendingTask>, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.dal.database.memory_store()?.get_task(id),
            self.get_task_sqlite(id).await
        )
    }

    async fn get_task_sqlite(&self, id: Uuid) -> Result<Option<PendingTask>, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;
        let id = id.to_string();

        let row: Option<PendingTaskRow> = conn
            .interact(move |conn| {
                pending_tasks::table
                    .find(id)
                    .first::<PendingTaskRow>(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(PendingTask::try_from).transpose()
    }

    /// Returns the task that would be activated next at `cutoff`, without claiming it.
    pub async fn get_first_ready_task(
        &self,
        cutoff: i64,
    ) -> Result<Option<PendingTask>, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.dal.database.memory_store()?.first_ready_task(cutoff),
            self.get_first_ready_task_sqlite(cutoff).await
        )
    }

    async fn get_first_ready_task_sqlite(
        &self,
        cutoff: i64,
    ) -> Result<Option<PendingTask>, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        let row = conn
            .interact(move |conn| first_ready_row(conn, cutoff))
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(PendingTask::try_from).transpose()
    }

    /// Returns tasks matching `query` in the query's order.
    pub async fn get_task_range(&self, query: &TaskQuery) -> Result<Vec<PendingTask>, StoreError> {
        self.get_task_page(query, None).await
    }

    /// Returns the page of tasks strictly after `after` in query order.
    async fn get_task_page(
        &self,
        query: &TaskQuery,
        after: Option<TaskOrderKey>,
    ) -> Result<Vec<PendingTask>, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.dal.database.memory_store()?.query_tasks(query, after),
            self.get_task_page_sqlite(query.clone(), after).await
        )
    }

    async fn get_task_page_sqlite(
        &self,
        query: TaskQuery,
        after: Option<TaskOrderKey>,
    ) -> Result<Vec<PendingTask>, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        let rows = conn
            .interact(move |conn| {
                let mut select = filtered(&query);

                if let Some((sched, submit, id)) = after {
                    let id = id.to_string();
                    select = match query.order {
                        SortOrder::Ascending => select.filter(
                            pending_tasks::sched_time
                                .gt(sched)
                                .or(pending_tasks::sched_time
                                    .eq(sched)
                                    .and(pending_tasks::submit_time.gt(submit)))
                                .or(pending_tasks::sched_time
                                    .eq(sched)
                                    .and(pending_tasks::submit_time.eq(submit))
                                    .and(pending_tasks::id.gt(id))),
                        ),
                        SortOrder::Descending => select.filter(
                            pending_tasks::sched_time
                                .lt(sched)
                                .or(pending_tasks::sched_time
                                    .eq(sched)
                                    .and(pending_tasks::submit_time.lt(submit)))
                                .or(pending_tasks::sched_time
                                    .eq(sched)
                                    .and(pending_tasks::submit_time.eq(submit))
                                    .and(pending_tasks::id.lt(id))),
                        ),
                    };
                }

                select = match query.order {
                    SortOrder::Ascending => select.order_by((
                        pending_tasks::sched_time.asc(),
                        pending_tasks::submit_time.asc(),
                        pending_tasks::id.asc(),
                    )),
                    SortOrder::Descending => select.order_by((
                        pending_tasks::sched_time.desc(),
                        pending_tasks::submit_time.desc(),
                        pending_tasks::id.desc(),
                    )),
                };

                if let Some(limit) = query.limit {
                    select = select.limit(limit);
                }

                select.load::<PendingTaskRow>(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        rows_into(rows)
    }

    /// Counts tasks matching `query`. Ordering and limit are ignored.
    pub async fn count_tasks(&self, query: &TaskQuery) -> Result<i64, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.dal.database.memory_store()?.count_tasks(query),
            self.count_tasks_sqlite(query.clone()).await
        )
    }

    async fn count_tasks_sqlite(&self, query: TaskQuery) -> Result<i64, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        let count = conn
            .interact(move |conn| filtered(&query).count().get_result::<i64>(conn))
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(count)
    }

    /// Opens a streaming cursor over tasks matching `query`.
    ///
    /// The cursor pages through the store with a keyset on
    /// `(sched_time, submit_time, id)`, so tasks inserted behind the cursor
    /// position are not revisited.
    pub fn iterate_task_range(&self, query: TaskQuery) -> PendingTaskCursor {
        PendingTaskCursor::new(self.dal.clone(), query, CURSOR_PAGE_SIZE)
    }

    /// Deletes every task matching `query`, claimed or not.
    ///
    /// This is an administrative operation; the dispatcher never calls it.
    pub async fn delete_task_range(&self, query: &TaskQuery) -> Result<usize, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.dal.database.memory_store()?.delete_tasks(query),
            self.delete_task_range_sqlite(query.clone()).await
        )
    }

    async fn delete_task_range_sqlite(&self, query: TaskQuery) -> Result<usize, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        let deleted = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                    let ids: Vec<String> = filtered(&query)
                        .select(pending_tasks::id)
                        .load::<String>(conn)?;
                    diesel::delete(pending_tasks::table.filter(pending_tasks::id.eq_any(ids)))
                        .execute(conn)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        debug!("Deleted {} pending tasks", deleted);
        Ok(deleted)
    }

    /// Deletes a single task by id, claimed or not.
    pub async fn delete_task_by_id(&self, id: Uuid) -> Result<bool, StoreError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.dal.database.memory_store()?.delete_task_by_id(id),
            self.delete_task_by_id_sqlite(id).await
        )
    }

    async fn delete_task_by_id_sqlite(&self, id: Uuid) -> Result<bool, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;
        let id = id.to_string();

        let deleted = conn
            .interact(move |conn| diesel::delete(pending_tasks::table.find(id)).execute(conn))
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(deleted > 0)
    }
}

/// Unordered select over `pending_tasks` with the query's filters applied.
fn filtered(query: &TaskQuery) -> pending_tasks::BoxedQuery<'static, Sqlite> {
    let mut select = pending_tasks::table.into_boxed();

    if let Some(lo) = query.sched_range.lo {
        select = select.filter(pending_tasks::sched_time.ge(lo));
    }
    if let Some(hi) = query.sched_range.hi {
        select = select.filter(pending_tasks::sched_time.lt(hi));
    }
    if let Some(event_id) = &query.event_id {
        select = select.filter(pending_tasks::event_id.eq(event_id.clone()));
    }
    if let Some(opcode) = query.opcode {
        select = select.filter(pending_tasks::opcode.eq(opcode));
    }

    select
}

/// The next unclaimed task due at `cutoff`, in execution order.
pub(crate) fn first_ready_row(
    conn: &mut SqliteConnection,
    cutoff: i64,
) -> Result<Option<PendingTaskRow>, diesel::result::Error> {
    pending_tasks::table
        .filter(pending_tasks::claim_id.is_null())
        .filter(pending_tasks::sched_time.le(cutoff))
        .order_by((
            pending_tasks::sched_time.asc(),
            pending_tasks::submit_time.asc(),
            pending_tasks::id.asc(),
        ))
        .first::<PendingTaskRow>(conn)
        .optional()
}

/// Streaming iterator over a task range.
///
/// Fetches one page at a time. Call [`PendingTaskCursor::close`] to stop
/// early; dropping the cursor has the same effect.
pub struct PendingTaskCursor {
    dal: DAL,
    query: TaskQuery,
    page_size: i64,
    buffer: VecDeque<PendingTask>,
    last_key: Option<TaskOrderKey>,
    remaining: Option<i64>,
    exhausted: bool,
}

impl PendingTaskCursor {
    fn new(dal: DAL, query: TaskQuery, page_size: i64) -> Self {
        let remaining = query.limit;
        Self {
            dal,
            query,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            last_key: None,
            remaining,
            exhausted: false,
        }
    }

    /// Returns the next task, or `None` when the range is exhausted.
    pub async fn next(&mut self) -> Result<Option<PendingTask>, StoreError> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }

        let task = self.buffer.pop_front();
        if let Some(remaining) = self.remaining.as_mut() {
            if task.is_some() {
                *remaining -= 1;
            }
        }
        Ok(task)
    }

    async fn fetch_page(&mut self) -> Result<(), StoreError> {
        let page_size = match self.remaining {
            Some(remaining) if remaining <= 0 => {
                self.exhausted = true;
                return Ok(());
            }
            Some(remaining) => remaining.min(self.page_size),
            None => self.page_size,
        };

        let mut page_query = self.query.clone();
        page_query.limit = Some(page_size);
        let page = self
            .dal
            .pending_task()
            .get_task_page(&page_query, self.last_key)
            .await?;

        if (page.len() as i64) < page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.last_key = Some(last.order_key());
        }
        self.buffer.extend(page);
        Ok(())
    }

    /// Stops the iteration and releases buffered rows.
    pub fn close(&mut self) {
        self.buffer.clear();
        self.exhausted = true;
    }

    pub fn is_closed(&self) -> bool {
        self.exhausted && self.buffer.is_empty()
    }
}
