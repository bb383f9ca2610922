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

//! aafsctl - command-line administration for the AAFS coordination store.

use std::path::PathBuf;

use aafs::config::ConfigLoader;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

/// aafsctl - inspect and drive the AAFS task queue and relay store
#[derive(Parser)]
#[command(name = "aafsctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Store URL (overrides the configuration file; also AAFS_DATABASE_URL)
    #[arg(long, env = "AAFS_DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Configuration file (defaults to AAFS_CONFIG or the standard search paths)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and edit pending tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Inspect and edit relay items
    Relay {
        #[command(subcommand)]
        command: RelayCommands,
    },
    /// Run the task dispatcher
    Run {
        /// Execute at most one ready task and exit
        #[arg(long, conflicts_with = "until")]
        once: bool,

        /// Execute every task due before this time, then exit
        /// (RFC 3339, epoch milliseconds, "now", or "now-1h")
        #[arg(long)]
        until: Option<String>,

        /// Advance the server clock to each task's scheduled time
        #[arg(long)]
        adjust_time: bool,

        /// Do not join the relay link
        #[arg(long)]
        no_link: bool,
    },
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Post a new task
    Post {
        #[arg(long)]
        opcode: i32,

        /// Scheduled time (defaults to now)
        #[arg(long)]
        at: Option<String>,

        #[arg(long, default_value = "")]
        event_id: String,

        #[arg(long, default_value_t = 0)]
        stage: i32,

        /// Task details as JSON
        #[arg(long)]
        details: Option<String>,
    },
    /// List pending tasks in execution order
    List {
        #[arg(long)]
        event_id: Option<String>,

        #[arg(long)]
        opcode: Option<i32>,

        /// Lower bound on scheduled time (inclusive)
        #[arg(long)]
        from: Option<String>,

        /// Upper bound on scheduled time (exclusive)
        #[arg(long)]
        to: Option<String>,

        #[arg(long)]
        descending: bool,

        #[arg(long)]
        limit: Option<i64>,
    },
    /// Delete a task by id, or every task for an event
    Delete {
        #[arg(long, conflicts_with = "event_id", required_unless_present = "event_id")]
        id: Option<uuid::Uuid>,

        #[arg(long)]
        event_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum RelayCommands {
    /// Write a relay item
    Submit {
        relay_id: String,

        /// Relay time (defaults to now)
        #[arg(long)]
        time: Option<String>,

        /// Item details as JSON
        #[arg(long, default_value = "{}")]
        details: String,

        /// Overwrite regardless of the stored time and stamp
        #[arg(long)]
        force: bool,

        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        stamp: i64,
    },
    /// List relay items in time order
    List {
        /// Only ids starting with this prefix (for example "pdlc_")
        #[arg(long)]
        prefix: Option<String>,

        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        to: Option<String>,

        #[arg(long)]
        descending: bool,

        #[arg(long)]
        limit: Option<i64>,
    },
    /// Delete a relay item, or every item with a prefix
    Delete {
        #[arg(conflicts_with = "prefix", required_unless_present = "prefix")]
        relay_id: Option<String>,

        #[arg(long)]
        prefix: Option<String>,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Delete every pending task and relay item
    DropAll {
        /// Must be the exact confirmation phrase
        #[arg(long)]
        confirm: String,
    },
    /// Drop and recreate secondary indexes
    RebuildIndexes,
    /// Return tasks activated longer ago than the given age to the queue
    RecoverClaims {
        /// Age such as "15m", "1h" or "1d2h"
        #[arg(long, default_value = "15m")]
        older_than: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let database_url = cli
        .database_url
        .clone()
        .unwrap_or_else(|| config.database.url.clone());
    let dal = commands::connect(&database_url).await?;

    match cli.command {
        Commands::Task { command } => match command {
            TaskCommands::Post {
                opcode,
                at,
                event_id,
                stage,
                details,
            } => {
                commands::task::post(&dal, opcode, at.as_deref(), event_id, stage, details.as_deref())
                    .await?
            }
            TaskCommands::List {
                event_id,
                opcode,
                from,
                to,
                descending,
                limit,
            } => {
                let filter = commands::task::ListFilter {
                    event_id,
                    opcode,
                    from,
                    to,
                    descending,
                    limit,
                };
                commands::task::list(&dal, filter).await?
            }
            TaskCommands::Delete { id, event_id } => {
                commands::task::delete(&dal, id, event_id).await?
            }
        },
        Commands::Relay { command } => match command {
            RelayCommands::Submit {
                relay_id,
                time,
                details,
                force,
                stamp,
            } => {
                commands::relay::submit(&dal, &relay_id, time.as_deref(), &details, force, stamp)
                    .await?
            }
            RelayCommands::List {
                prefix,
                from,
                to,
                descending,
                limit,
            } => {
                let filter = commands::relay::ListFilter {
                    prefix,
                    from,
                    to,
                    descending,
                    limit,
                };
                commands::relay::list(&dal, filter).await?
            }
            RelayCommands::Delete { relay_id, prefix } => {
                commands::relay::delete(&dal, relay_id, prefix).await?
            }
        },
        Commands::Run {
            once,
            until,
            adjust_time,
            no_link,
        } => {
            let options = commands::run::RunOptions {
                once,
                until,
                adjust_time,
                verbose: cli.verbose,
                link: !no_link,
            };
            commands::run::run(dal, &config, options).await?
        }
        Commands::Admin { command } => match command {
            AdminCommands::DropAll { confirm } => commands::admin::drop_all(&dal, &confirm).await?,
            AdminCommands::RebuildIndexes => commands::admin::rebuild_indexes(&dal).await?,
            AdminCommands::RecoverClaims { older_than } => {
                commands::admin::recover_claims(&dal, &older_than).await?
            }
        },
    }

    Ok(())
}
