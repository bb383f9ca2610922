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

//! `task` subcommands.

use aafs::models::pending_task::TaskQuery;
use aafs::models::TimeRange;
use aafs::{NewPendingTask, DAL};
use anyhow::{Context, Result};
use tracing::info;
use uuid::Uuid;

use super::time::{format_time_ms, parse_time_ms};

pub struct ListFilter {
    pub event_id: Option<String>,
    pub opcode: Option<i32>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub descending: bool,
    pub limit: Option<i64>,
}

pub async fn post(
    dal: &DAL,
    opcode: i32,
    at: Option<&str>,
    event_id: String,
    stage: i32,
    details: Option<&str>,
) -> Result<()> {
    let now = dal.now_ms();
    let sched_time = at.map(|s| parse_time_ms(s, now)).transpose()?.unwrap_or(now);
    let details = details
        .map(serde_json::from_str)
        .transpose()
        .context("Task details must be valid JSON")?
        .unwrap_or(serde_json::Value::Null);

    let task = dal
        .pending_task()
        .submit_task(
            NewPendingTask::new(opcode, sched_time)
                .with_event_id(event_id)
                .with_stage(stage)
                .with_details(details)
                .with_submit_id("aafsctl"),
        )
        .await
        .context("Failed to post task")?;

    info!(
        "Posted task {} (opcode={}, sched_time={})",
        task.id,
        task.opcode,
        format_time_ms(task.sched_time)
    );
    println!("{}", task.id);
    Ok(())
}

pub async fn list(dal: &DAL, filter: ListFilter) -> Result<()> {
    let now = dal.now_ms();
    let range = TimeRange::new(
        filter.from.as_deref().map(|s| parse_time_ms(s, now)).transpose()?,
        filter.to.as_deref().map(|s| parse_time_ms(s, now)).transpose()?,
    );

    let mut query = TaskQuery::all().in_range(range);
    if let Some(event_id) = filter.event_id {
        query = query.for_event(event_id);
    }
    if let Some(opcode) = filter.opcode {
        query = query.with_opcode(opcode);
    }
    if filter.descending {
        query = query.descending();
    }
    if let Some(limit) = filter.limit {
        query = query.limit(limit);
    }

    let mut cursor = dal.pending_task().iterate_task_range(query);
    let mut count = 0;
    while let Some(task) = cursor.next().await.context("Failed to read tasks")? {
        println!(
            "{}  {}  opcode={:<5} stage={:<3} event_id={:<12} {}{}",
            task.id,
            format_time_ms(task.sched_time),
            task.opcode,
            task.stage,
            if task.event_id.is_empty() { "-" } else { task.event_id.as_str() },
            task.submit_id,
            if task.is_activated() { "  [activated]" } else { "" },
        );
        count += 1;
    }
    cursor.close();

    info!("{} task(s)", count);
    Ok(())
}

pub async fn delete(dal: &DAL, id: Option<Uuid>, event_id: Option<String>) -> Result<()> {
    match (id, event_id) {
        (Some(id), _) => {
            let deleted = dal
                .pending_task()
                .delete_task_by_id(id)
                .await
                .context("Failed to delete task")?;
            if deleted {
                info!("Deleted task {}", id);
            } else {
                info!("No task with id {}", id);
            }
        }
        (None, Some(event_id)) => {
            let deleted = dal
                .pending_task()
                .delete_task_range(&TaskQuery::all().for_event(event_id.clone()))
                .await
                .context("Failed to delete tasks")?;
            info!("Deleted {} task(s) for event '{}'", deleted, event_id);
        }
        (None, None) => anyhow::bail!("Either --id or --event-id is required"),
    }
    Ok(())
}
