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

//! Command implementations.

pub mod admin;
pub mod relay;
pub mod run;
pub mod task;
pub mod time;

use aafs::{Database, DAL};
use anyhow::{Context, Result};
use tracing::debug;

/// Opens the store at `database_url` and applies migrations.
pub async fn connect(database_url: &str) -> Result<DAL> {
    let database = Database::try_new(database_url)
        .with_context(|| format!("Failed to open store '{}'", database_url))?;
    database
        .run_migrations()
        .await
        .context("Failed to apply store migrations")?;
    debug!("Connected to {} store", database.backend().as_str());
    Ok(DAL::new(database))
}
