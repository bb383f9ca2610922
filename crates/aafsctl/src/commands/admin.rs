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

//! `admin` subcommands.

use aafs::DAL;
use anyhow::{Context, Result};
use tracing::info;

use super::time::parse_duration;

pub async fn drop_all(dal: &DAL, confirmation: &str) -> Result<()> {
    dal.admin().drop_all(confirmation).await.with_context(|| {
        format!(
            "Refusing to drop the store; pass --confirm \"{}\"",
            aafs::dal::DROP_ALL_CONFIRMATION
        )
    })?;
    info!("All pending tasks and relay items deleted");
    Ok(())
}

pub async fn rebuild_indexes(dal: &DAL) -> Result<()> {
    let admin = dal.admin();
    admin.drop_indexes().await.context("Failed to drop indexes")?;
    admin.make_indexes().await.context("Failed to create indexes")?;
    info!("Indexes rebuilt");
    Ok(())
}

pub async fn recover_claims(dal: &DAL, older_than: &str) -> Result<()> {
    let age = parse_duration(older_than)
        .with_context(|| format!("Invalid duration: '{}'", older_than))?;
    let claimed_before = dal.now_ms() - age.num_milliseconds();

    let recovered = dal
        .pending_task()
        .reset_expired_claims(claimed_before)
        .await
        .context("Failed to recover claims")?;
    info!("Returned {} task(s) to the queue", recovered);
    Ok(())
}
