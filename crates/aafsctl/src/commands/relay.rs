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

//! `relay` subcommands.

use aafs::models::relay_item::RelayQuery;
use aafs::models::TimeRange;
use aafs::relay::classify_relay_id;
use aafs::{RelayStamp, DAL};
use anyhow::{Context, Result};
use tracing::{info, warn};

use super::time::{format_time_ms, parse_time_ms};

pub struct ListFilter {
    pub prefix: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub descending: bool,
    pub limit: Option<i64>,
}

pub async fn submit(
    dal: &DAL,
    relay_id: &str,
    time: Option<&str>,
    details: &str,
    force: bool,
    stamp: i64,
) -> Result<()> {
    if classify_relay_id(relay_id).is_none() {
        warn!("Relay id '{}' does not match any known kind", relay_id);
    }
    let now = dal.now_ms();
    let relay_time = time.map(|s| parse_time_ms(s, now)).transpose()?.unwrap_or(now);
    let details: serde_json::Value =
        serde_json::from_str(details).context("Relay details must be valid JSON")?;

    let written = dal
        .relay_item()
        .submit_relay_item(relay_id, relay_time, details, force, RelayStamp(stamp))
        .await
        .context("Failed to submit relay item")?;

    match written {
        Some(item) => info!(
            "Relay item '{}' written at {} (seq {})",
            item.relay_id,
            format_time_ms(item.relay_time),
            item.change_seq
        ),
        None => info!("Relay item '{}' not written: a newer value is stored", relay_id),
    }
    Ok(())
}

pub async fn list(dal: &DAL, filter: ListFilter) -> Result<()> {
    let now = dal.now_ms();
    let range = TimeRange::new(
        filter.from.as_deref().map(|s| parse_time_ms(s, now)).transpose()?,
        filter.to.as_deref().map(|s| parse_time_ms(s, now)).transpose()?,
    );

    let mut query = RelayQuery::all().in_range(range);
    if let Some(prefix) = filter.prefix {
        query = query.with_prefix(prefix);
    }
    if filter.descending {
        query = query.descending();
    }
    if let Some(limit) = filter.limit {
        query = query.limit(limit);
    }

    let items = dal
        .relay_item()
        .get_relay_item_range(&query)
        .await
        .context("Failed to read relay items")?;
    for item in &items {
        let kind = classify_relay_id(&item.relay_id)
            .map(|k| k.name())
            .unwrap_or("unknown");
        println!(
            "{}  {:<24} {:<18} stamp={:<14} {}",
            format_time_ms(item.relay_time),
            item.relay_id,
            kind,
            item.relay_stamp,
            item.details
        );
    }

    info!("{} relay item(s)", items.len());
    Ok(())
}

pub async fn delete(dal: &DAL, relay_id: Option<String>, prefix: Option<String>) -> Result<()> {
    match (relay_id, prefix) {
        (Some(relay_id), _) => {
            let deleted = dal
                .relay_item()
                .delete_relay_item(&relay_id)
                .await
                .context("Failed to delete relay item")?;
            if deleted {
                info!("Deleted relay item '{}'", relay_id);
            } else {
                info!("No relay item '{}'", relay_id);
            }
        }
        (None, Some(prefix)) => {
            let deleted = dal
                .relay_item()
                .delete_relay_item_range(&RelayQuery::all().with_prefix(prefix.clone()))
                .await
                .context("Failed to delete relay items")?;
            info!("Deleted {} relay item(s) with prefix '{}'", deleted, prefix);
        }
        (None, None) => anyhow::bail!("Either a relay id or --prefix is required"),
    }
    Ok(())
}
