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

//! The dispatch loop.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::DispatcherConfig;
use super::handler::{DispatchContext, HandlerRegistry, TaskOutcome};
use super::work_distributor::{PollingDistributor, WorkDistributor};
use super::{OPCODE_NO_OP, OPCODE_ROLE_CHANGE, OPCODE_SHUTDOWN};
use crate::dal::DAL;
use crate::error::{DispatchError, StoreError};
use crate::models::pending_task::{NewPendingTask, PendingTask, TaskStaging};

/// Claims and executes pending tasks.
///
/// Several dispatchers, in one process or many, may share a store; the
/// activation protocol guarantees each task is executed by one of them at a
/// time.
pub struct TaskDispatcher {
    dal: DAL,
    registry: HandlerRegistry,
    config: DispatcherConfig,
    shutdown: CancellationToken,
    distributor: Arc<dyn WorkDistributor>,
    last_recovery_ms: AtomicI64,
}

impl TaskDispatcher {
    pub fn new(dal: DAL, registry: HandlerRegistry, config: DispatcherConfig) -> Self {
        let distributor = Arc::new(PollingDistributor::with_poll_interval(
            config.poll_interval(),
        ));
        Self {
            dal,
            registry,
            config,
            shutdown: CancellationToken::new(),
            distributor,
            last_recovery_ms: AtomicI64::new(i64::MIN),
        }
    }

    /// Replaces the default polling distributor.
    pub fn with_distributor(mut self, distributor: Arc<dyn WorkDistributor>) -> Self {
        self.distributor = distributor;
        self
    }

    pub fn dal(&self) -> &DAL {
        &self.dal
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Token cancelled when the dispatcher shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops the dispatcher. The run loop exits after the current task.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.distributor.shutdown();
    }

    fn context(&self, verbose: bool) -> DispatchContext {
        DispatchContext::new(self.dal.clone(), self.config.submit_id().to_string(), verbose)
    }

    /// Stores a task and wakes the run loop.
    pub async fn post_task(&self, task: NewPendingTask) -> Result<PendingTask, DispatchError> {
        let posted = self.context(false).post_task(task).await?;
        self.distributor.notify_work();
        Ok(posted)
    }

    /// Posts a shutdown task, due now.
    pub async fn post_shutdown(&self, reason: &str) -> Result<PendingTask, DispatchError> {
        info!("Posting shutdown: {}", reason);
        self.post_task(
            NewPendingTask::new(OPCODE_SHUTDOWN, self.dal.now_ms())
                .with_details(json!({ "reason": reason })),
        )
        .await
    }

    /// True if the dispatcher is shut down or the next ready task is a shutdown.
    pub async fn test_check_for_shutdown(&self) -> Result<bool, DispatchError> {
        if self.is_shut_down() {
            return Ok(true);
        }
        let next = self
            .dal
            .pending_task()
            .get_first_ready_task(self.dal.now_ms())
            .await?;
        Ok(next.is_some_and(|task| task.opcode == OPCODE_SHUTDOWN))
    }

    /// Activates and executes one ready task.
    ///
    /// `cutoff` defaults to the current server time. With `adjust_time` the
    /// clock is moved forward to the task's scheduled time before the handler
    /// runs, which lets a replay run through a backlog without waiting.
    ///
    /// Returns `Ok(false)` when nothing was ready or a shutdown task was
    /// executed, `Ok(true)` otherwise. Handler failures are logged and do not
    /// surface here; the failed task stays activated until the recovery sweep
    /// returns it to the queue.
    pub async fn run_next_task(
        &self,
        verbose: bool,
        adjust_time: bool,
        cutoff: Option<i64>,
    ) -> Result<bool, DispatchError> {
        if self.is_shut_down() {
            return Ok(false);
        }

        let cutoff = cutoff.unwrap_or_else(|| self.dal.now_ms());
        let Some(task) = self
            .dal
            .pending_task()
            .activate_first_ready_task(cutoff)
            .await?
        else {
            return Ok(false);
        };

        if adjust_time {
            self.dal.clock().adjust_to(task.sched_time);
        }

        if verbose {
            info!(
                "Dispatching task {} opcode={} stage={} event_id='{}' sched_time={}",
                task.id, task.opcode, task.stage, task.event_id, task.sched_time
            );
        } else {
            debug!(
                "Dispatching task {} opcode={} stage={}",
                task.id, task.opcode, task.stage
            );
        }

        if task.opcode == OPCODE_SHUTDOWN {
            let reason = task.details["reason"].as_str().unwrap_or("unspecified");
            info!("Shutdown task {} executed: {}", task.id, reason);
            self.dal.pending_task().delete_task(&task).await?;
            self.shutdown();
            return Ok(false);
        }

        let Some(handler) = self.registry.get(task.opcode) else {
            match task.opcode {
                OPCODE_NO_OP | OPCODE_ROLE_CHANGE => {
                    debug!("Discarding task {} with opcode {}", task.id, task.opcode)
                }
                _ => error!(
                    "No handler registered for opcode {}; deleting task {} (event_id='{}', stage={})",
                    task.opcode, task.id, task.event_id, task.stage
                ),
            }
            self.finish(&task, TaskOutcome::Delete).await?;
            return Ok(true);
        };

        let ctx = self.context(verbose);
        let result = AssertUnwindSafe(handler.execute(&ctx, &task))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(outcome)) => {
                metrics::counter!("aafs_tasks_executed_total", "result" => "ok").increment(1);
                self.finish(&task, outcome).await?;
            }
            Ok(Err(e)) => {
                metrics::counter!("aafs_tasks_executed_total", "result" => "failed").increment(1);
                error!(
                    "Handler failed for task {} (opcode={}, stage={}, event_id='{}'): {}; task left activated",
                    task.id, task.opcode, task.stage, task.event_id, e
                );
            }
            Err(panic) => {
                metrics::counter!("aafs_tasks_executed_total", "result" => "panicked").increment(1);
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    "Handler panicked for task {} (opcode={}, stage={}, event_id='{}'): {}; task left activated",
                    task.id, task.opcode, task.stage, task.event_id, message
                );
            }
        }

        Ok(true)
    }

    /// Applies a handler outcome to an activated task.
    async fn finish(&self, task: &PendingTask, outcome: TaskOutcome) -> Result<(), DispatchError> {
        let pending = self.dal.pending_task();
        let applied = match outcome {
            TaskOutcome::Delete => pending.delete_task(task).await,
            TaskOutcome::Stage(staging) => pending.stage_task(task, staging).await,
            TaskOutcome::Repost => {
                let delay_ms = self.config.repost_delay().as_millis() as i64;
                let staging = TaskStaging::new(self.dal.now_ms() + delay_ms, task.stage);
                pending.stage_task(task, staging).await
            }
        };

        match applied {
            Ok(()) => Ok(()),
            // The claim expired and was recovered while the handler ran
            Err(StoreError::NotClaimed { task_id }) => {
                warn!(
                    "Task {} lost its claim before completion; leaving it for the next owner",
                    task_id
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Executes ready tasks until none remain at `cutoff` or a shutdown runs.
    ///
    /// With a fixed cutoff this drains a replay backlog; the clock is adjusted
    /// to each task's scheduled time.
    pub async fn run_until_idle(&self, cutoff: Option<i64>) -> Result<usize, DispatchError> {
        let mut executed = 0;
        while self.run_next_task(false, cutoff.is_some(), cutoff).await? {
            executed += 1;
        }
        Ok(executed)
    }

    /// Returns tasks abandoned longer than the claim timeout to the queue.
    pub async fn run_recovery_sweep(&self) -> Result<usize, DispatchError> {
        let now = self.dal.now_ms();
        self.last_recovery_ms.store(now, Ordering::SeqCst);
        let claimed_before = now - self.config.claim_timeout().as_millis() as i64;
        Ok(self
            .dal
            .pending_task()
            .reset_expired_claims(claimed_before)
            .await?)
    }

    async fn maybe_run_recovery(&self) -> Result<(), DispatchError> {
        if !self.config.enable_recovery() {
            return Ok(());
        }
        let now = self.dal.now_ms();
        let last = self.last_recovery_ms.load(Ordering::SeqCst);
        let interval = self.config.recovery_interval().as_millis() as i64;
        if last == i64::MIN || now.saturating_sub(last) >= interval {
            self.run_recovery_sweep().await?;
        }
        Ok(())
    }

    /// Runs until shut down.
    ///
    /// Retryable store errors are logged and the loop backs off for one poll
    /// interval; anything else ends the loop with the error.
    pub async fn run(&self) -> Result<(), DispatchError> {
        info!(
            "Task dispatcher started (submit_id='{}', opcodes={:?})",
            self.config.submit_id(),
            self.registry.opcodes()
        );

        loop {
            if self.is_shut_down() {
                break;
            }

            if let Err(e) = self.maybe_run_recovery().await {
                warn!("Claim recovery sweep failed: {}", e);
            }

            match self.run_next_task(false, false, None).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) if e.is_retryable() => warn!("Dispatch failed, will retry: {}", e),
                Err(e) => {
                    error!("Dispatcher stopping on error: {}", e);
                    return Err(e);
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.distributor.wait_for_work() => {}
            }
        }

        info!("Task dispatcher stopped");
        Ok(())
    }
}
