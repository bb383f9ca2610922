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

//! `run` subcommand.

use std::sync::Arc;

use aafs::config::AafsConfig;
use aafs::dispatcher::OPCODE_ROLE_CHANGE;
use aafs::{HandlerRegistry, RelayLink, TaskDispatcher, TaskOutcome, DAL};
use anyhow::{Context, Result};
use tracing::{info, warn};

use super::time::{format_time_ms, parse_time_ms};

pub struct RunOptions {
    pub once: bool,
    pub until: Option<String>,
    pub adjust_time: bool,
    pub verbose: bool,
    pub link: bool,
}

fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_fn(OPCODE_ROLE_CHANGE, |_ctx, task| async move {
        info!("Role change: {}", task.details);
        Ok(TaskOutcome::Delete)
    });
    registry
}

pub async fn run(dal: DAL, config: &AafsConfig, options: RunOptions) -> Result<()> {
    let dispatcher = Arc::new(TaskDispatcher::new(
        dal.clone(),
        registry(),
        config.dispatcher_config(),
    ));

    if options.once {
        let executed = dispatcher
            .run_next_task(options.verbose, options.adjust_time, None)
            .await
            .context("Dispatch failed")?;
        info!("{}", if executed { "Executed one task" } else { "No task executed" });
        return Ok(());
    }

    if let Some(until) = options.until {
        let cutoff = parse_time_ms(&until, dal.now_ms())?;
        let mut executed = 0;
        while dispatcher
            .run_next_task(options.verbose, options.adjust_time, Some(cutoff))
            .await
            .context("Dispatch failed")?
        {
            executed += 1;
        }
        info!(
            "Executed {} task(s) due before {}",
            executed,
            format_time_ms(cutoff)
        );
        return Ok(());
    }

    let link = if options.link {
        let link = Arc::new(RelayLink::new(dal.clone(), config.relay_link_config()));
        link.init_relay_link()
            .await
            .context("Failed to join the relay link")?;
        Some(link)
    } else {
        None
    };

    let link_poller = link.clone().map(|link| {
        let token = dispatcher.shutdown_token();
        let interval = link.config().heartbeat_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = link.poll_relay_link().await {
                            warn!("Relay link poll failed: {}", e);
                        }
                    }
                }
            }
        })
    });

    let interrupted = dispatcher.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; shutting down");
            interrupted.shutdown();
        }
    });

    let result = dispatcher.run().await;

    if let Some(poller) = link_poller {
        dispatcher.shutdown();
        if let Err(e) = poller.await {
            warn!("Relay link poller ended abnormally: {}", e);
        }
    }
    if let Some(link) = link {
        link.shutdown_relay_link()
            .await
            .context("Failed to leave the relay link")?;
    }

    result.context("Dispatcher failed")
}
