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

//! SQLite row types and their conversions to domain models.

use diesel::prelude::*;
use uuid::Uuid;

use crate::database::schema::{pending_tasks, relay_items};
use crate::error::StoreError;
use crate::models::pending_task::{PendingTask, TaskClaim};
use crate::models::relay_item::{RelayItem, RelayStamp};

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value)
        .map_err(|e| StoreError::InvalidData(format!("bad uuid '{}': {}", value, e)))
}

/// A row of `pending_tasks`.
#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = pending_tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PendingTaskRow {
    pub id: String,
    pub event_id: String,
    pub sched_time: i64,
    pub submit_time: i64,
    pub submit_id: String,
    pub opcode: i32,
    pub stage: i32,
    pub details: String,
    pub claim_id: Option<String>,
    pub claimed_at: Option<i64>,
}

impl TryFrom<&PendingTask> for PendingTaskRow {
    type Error = StoreError;

    fn try_from(task: &PendingTask) -> Result<Self, Self::Error> {
        Ok(PendingTaskRow {
            id: task.id.to_string(),
            event_id: task.event_id.clone(),
            sched_time: task.sched_time,
            submit_time: task.submit_time,
            submit_id: task.submit_id.clone(),
            opcode: task.opcode,
            stage: task.stage,
            details: serde_json::to_string(&task.details)?,
            claim_id: task.claim.as_ref().map(|c| c.claim_id.to_string()),
            claimed_at: task.claim.as_ref().map(|c| c.claimed_at),
        })
    }
}

impl TryFrom<PendingTaskRow> for PendingTask {
    type Error = StoreError;

    fn try_from(row: PendingTaskRow) -> Result<Self, Self::Error> {
        let claim = match (row.claim_id, row.claimed_at) {
            (Some(claim_id), Some(claimed_at)) => Some(TaskClaim {
                claim_id: parse_uuid(&claim_id)?,
                claimed_at,
            }),
            (None, None) => None,
            _ => {
                return Err(StoreError::InvalidData(format!(
                    "task {} has a partial claim",
                    row.id
                )))
            }
        };

        Ok(PendingTask {
            id: parse_uuid(&row.id)?,
            event_id: row.event_id,
            sched_time: row.sched_time,
            submit_time: row.submit_time,
            submit_id: row.submit_id,
            opcode: row.opcode,
            stage: row.stage,
            details: serde_json::from_str(&row.details)?,
            claim,
        })
    }
}

/// A row of `relay_items`.
#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = relay_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RelayItemRow {
    pub relay_id: String,
    pub relay_time: i64,
    pub relay_stamp: i64,
    pub details: String,
    pub change_seq: i64,
}

impl TryFrom<RelayItemRow> for RelayItem {
    type Error = StoreError;

    fn try_from(row: RelayItemRow) -> Result<Self, Self::Error> {
        Ok(RelayItem {
            relay_id: row.relay_id,
            relay_time: row.relay_time,
            relay_stamp: RelayStamp(row.relay_stamp),
            details: serde_json::from_str(&row.details)?,
            change_seq: row.change_seq,
        })
    }
}

/// Converts a batch of rows, failing on the first bad row.
pub(crate) fn rows_into<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}
