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

//! Task activation and claim-guarded mutation.
//!
//! Activation is atomic on both backends: SQLite runs the select and the
//! guarded update inside one `IMMEDIATE` transaction, which takes the write
//! lock up front so two processes can never select the same row; the memory
//! store does both under one mutex. Stage and delete are guarded by the claim
//! id handed out at activation.

use diesel::prelude::*;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{first_ready_row, PendingTaskDAL};
use crate::dal::models::PendingTaskRow;
use crate::database::schema::pending_tasks;
use crate::error::StoreError;
use crate::models::pending_task::{PendingTask, TaskClaim, TaskStaging};

impl<'a> PendingTaskDAL<'a> {
    /// Atomically claims the first ready task at `cutoff`.
    ///
    /// Returns `Ok(None)` when nothing is ready. A returned task carries its
    /// claim and may only be staged or deleted by presenting it.
    pub async fn activate_first_ready_task(
        &self,
        cutoff: i64,
    ) -> Result<Option<PendingTask>, StoreError> {
        let claim = TaskClaim {
            claim_id: Uuid::new_v4(),
            claimed_at: self.dal.now_ms(),
        };

        let activated = crate::dispatch_backend!(
            self.dal.backend(),
            self.dal
                .database
                .memory_store()?
                .activate_first_ready_task(cutoff, claim),
            self.activate_first_ready_task_sqlite(cutoff, claim).await
        )?;

        if let Some(task) = &activated {
            metrics::counter!("aafs_tasks_activated_total").increment(1);
            debug!(
                "Activated task {} (opcode={}, stage={}, event_id='{}')",
                task.id, task.opcode, task.stage, task.event_id
            );
        }
        Ok(activated)
    }

    async fn activate_first_ready_task_sqlite(
        &self,
        cutoff: i64,
        claim: TaskClaim,
    ) -> Result<Option<PendingTask>, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        let row = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                    let Some(mut row) = first_ready_row(conn, cutoff)? else {
                        return Ok(None);
                    };

                    let claim_id = claim.claim_id.to_string();
                    let updated = diesel::update(
                        pending_tasks::table
                            .filter(pending_tasks::id.eq(row.id.clone()))
                            .filter(pending_tasks::claim_id.is_null()),
                    )
                    .set((
                        pending_tasks::claim_id.eq(Some(claim_id.clone())),
                        pending_tasks::claimed_at.eq(Some(claim.claimed_at)),
                    ))
                    .execute(conn)?;

                    if updated == 0 {
                        return Ok(None);
                    }

                    row.claim_id = Some(claim_id);
                    row.claimed_at = Some(claim.claimed_at);
                    Ok(Some(row))
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        row.map(PendingTask::try_from).transpose()
    }

    /// Reschedules an activated task and releases its claim.
    ///
    /// Fails with [`StoreError::NotClaimed`] unless `task` carries the claim
    /// currently stored for it.
    pub async fn stage_task(
        &self,
        task: &PendingTask,
        staging: TaskStaging,
    ) -> Result<(), StoreError> {
        let claim_id = task.claim_id().ok_or(StoreError::NotClaimed { task_id: task.id })?;

        let staged = crate::dispatch_backend!(
            self.dal.backend(),
            self.dal
                .database
                .memory_store()?
                .stage_task(task.id, claim_id, &staging),
            self.stage_task_sqlite(task.id, claim_id, staging.clone())
                .await
        )?;

        if !staged {
            return Err(StoreError::NotClaimed { task_id: task.id });
        }
        debug!(
            "Staged task {} to stage {} at {}",
            task.id, staging.stage, staging.sched_time
        );
        Ok(())
    }

    async fn stage_task_sqlite(
        &self,
        id: Uuid,
        claim_id: Uuid,
        staging: TaskStaging,
    ) -> Result<bool, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;
        let details = staging
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let staged = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                    let held = pending_tasks::table
                        .filter(pending_tasks::id.eq(id.to_string()))
                        .filter(pending_tasks::claim_id.eq(Some(claim_id.to_string())));

                    let Some(current) = held.clone().first::<PendingTaskRow>(conn).optional()?
                    else {
                        return Ok(false);
                    };

                    diesel::update(held)
                        .set((
                            pending_tasks::sched_time.eq(staging.sched_time),
                            pending_tasks::stage.eq(staging.stage),
                            pending_tasks::event_id
                                .eq(staging.event_id.unwrap_or(current.event_id)),
                            pending_tasks::details.eq(details.unwrap_or(current.details)),
                            pending_tasks::claim_id.eq(None::<String>),
                            pending_tasks::claimed_at.eq(None::<i64>),
                        ))
                        .execute(conn)?;
                    Ok(true)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(staged)
    }

    /// Deletes an activated task.
    ///
    /// Fails with [`StoreError::NotClaimed`] unless `task` carries the claim
    /// currently stored for it.
    pub async fn delete_task(&self, task: &PendingTask) -> Result<(), StoreError> {
        let claim_id = task.claim_id().ok_or(StoreError::NotClaimed { task_id: task.id })?;

        let deleted = crate::dispatch_backend!(
            self.dal.backend(),
            self.dal
                .database
                .memory_store()?
                .delete_claimed_task(task.id, claim_id),
            self.delete_task_sqlite(task.id, claim_id).await
        )?;

        if !deleted {
            return Err(StoreError::NotClaimed { task_id: task.id });
        }
        debug!("Deleted task {}", task.id);
        Ok(())
    }

    async fn delete_task_sqlite(&self, id: Uuid, claim_id: Uuid) -> Result<bool, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        let deleted = conn
            .interact(move |conn| {
                diesel::delete(
                    pending_tasks::table
                        .filter(pending_tasks::id.eq(id.to_string()))
                        .filter(pending_tasks::claim_id.eq(Some(claim_id.to_string()))),
                )
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(deleted > 0)
    }

    /// Returns tasks whose claim was taken before `claimed_before` to the ready state.
    ///
    /// A dispatcher that dies mid-task leaves its claim behind; this sweep makes
    /// such tasks runnable again, so a handler may run more than once.
    pub async fn reset_expired_claims(&self, claimed_before: i64) -> Result<usize, StoreError> {
        let reset = crate::dispatch_backend!(
            self.dal.backend(),
            self.dal
                .database
                .memory_store()?
                .reset_expired_claims(claimed_before),
            self.reset_expired_claims_sqlite(claimed_before).await
        )?;

        if reset > 0 {
            metrics::counter!("aafs_task_claims_recovered_total").increment(reset as u64);
            warn!(
                "Recovered {} tasks with claims older than {}",
                reset, claimed_before
            );
        }
        Ok(reset)
    }

    async fn reset_expired_claims_sqlite(&self, claimed_before: i64) -> Result<usize, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        let reset = conn
            .interact(move |conn| {
                diesel::update(
                    pending_tasks::table.filter(pending_tasks::claimed_at.lt(claimed_before)),
                )
                .set((
                    pending_tasks::claim_id.eq(None::<String>),
                    pending_tasks::claimed_at.eq(None::<i64>),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(reset)
    }

    /// Deletes waiting (unclaimed) tasks whose opcode is in `opcodes`.
    pub async fn cancel_waiting_tasks(&self, opcodes: &[i32]) -> Result<usize, StoreError> {
        if opcodes.is_empty() {
            return Ok(0);
        }

        let cancelled = crate::dispatch_backend!(
            self.dal.backend(),
            self.dal
                .database
                .memory_store()?
                .cancel_waiting_tasks(opcodes),
            self.cancel_waiting_tasks_sqlite(opcodes.to_vec()).await
        )?;

        if cancelled > 0 {
            info!("Cancelled {} waiting tasks (opcodes {:?})", cancelled, opcodes);
        }
        Ok(cancelled)
    }

    async fn cancel_waiting_tasks_sqlite(&self, opcodes: Vec<i32>) -> Result<usize, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        let cancelled = conn
            .interact(move |conn| {
                diesel::delete(
                    pending_tasks::table
                        .filter(pending_tasks::claim_id.is_null())
                        .filter(pending_tasks::opcode.eq_any(opcodes)),
                )
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(cancelled)
    }
}
