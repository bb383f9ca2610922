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

//! Task handler interface and the opcode registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::dal::DAL;
use crate::error::{HandlerError, StoreError};
use crate::models::pending_task::{NewPendingTask, PendingTask, TaskStaging};

/// What the dispatcher should do with a task after its handler returns.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The task is finished; remove it.
    Delete,
    /// Reschedule the task, optionally replacing its event id or details.
    Stage(TaskStaging),
    /// Run the task again later, unchanged, after the configured repost delay.
    Repost,
}

impl TaskOutcome {
    /// Reschedules at `sched_time` with a new stage, keeping event id and details.
    pub fn stage(sched_time: i64, stage: i32) -> Self {
        TaskOutcome::Stage(TaskStaging::new(sched_time, stage))
    }

    /// Reschedules with replacement details.
    pub fn stage_with_details(sched_time: i64, stage: i32, details: serde_json::Value) -> Self {
        TaskOutcome::Stage(TaskStaging {
            sched_time,
            stage,
            event_id: None,
            details: Some(details),
        })
    }
}

/// Everything a handler may use while executing a task.
#[derive(Clone, Debug)]
pub struct DispatchContext {
    dal: DAL,
    submit_id: String,
    verbose: bool,
}

impl DispatchContext {
    pub(crate) fn new(dal: DAL, submit_id: String, verbose: bool) -> Self {
        Self {
            dal,
            submit_id,
            verbose,
        }
    }

    pub fn dal(&self) -> &DAL {
        &self.dal
    }

    /// Current server time.
    pub fn now_ms(&self) -> i64 {
        self.dal.now_ms()
    }

    pub fn submit_id(&self) -> &str {
        &self.submit_id
    }

    /// Whether the dispatcher was asked for verbose output for this task.
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Posts a follow-up task, tagging it with this dispatcher's submit id
    /// unless one was set.
    pub async fn post_task(&self, mut task: NewPendingTask) -> Result<PendingTask, StoreError> {
        if task.submit_id.is_empty() {
            task.submit_id = self.submit_id.clone();
        }
        self.dal.pending_task().submit_task(task).await
    }
}

/// Executes tasks for one opcode.
///
/// Execution is at-least-once: a task whose dispatcher dies mid-run is
/// returned to the queue by the claim recovery sweep and run again, so
/// handlers must tolerate repeats.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(
        &self,
        ctx: &DispatchContext,
        task: &PendingTask,
    ) -> Result<TaskOutcome, HandlerError>;
}

/// Adapts an async closure into a [`TaskHandler`].
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(DispatchContext, PendingTask) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutcome, HandlerError>> + Send,
{
    async fn execute(
        &self,
        ctx: &DispatchContext,
        task: &PendingTask,
    ) -> Result<TaskOutcome, HandlerError> {
        (self.func)(ctx.clone(), task.clone()).await
    }
}

/// Maps opcodes to handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<i32, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `opcode`, replacing any previous one.
    pub fn register<H>(&mut self, opcode: i32, handler: H) -> &mut Self
    where
        H: TaskHandler + 'static,
    {
        self.handlers.insert(opcode, Arc::new(handler));
        self
    }

    /// Registers an async closure for `opcode`.
    pub fn register_fn<F, Fut>(&mut self, opcode: i32, func: F) -> &mut Self
    where
        F: Fn(DispatchContext, PendingTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskOutcome, HandlerError>> + Send + 'static,
    {
        self.register(opcode, FnHandler::new(func))
    }

    pub fn get(&self, opcode: i32) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&opcode).cloned()
    }

    pub fn contains(&self, opcode: i32) -> bool {
        self.handlers.contains_key(&opcode)
    }

    /// Registered opcodes in ascending order.
    pub fn opcodes(&self) -> Vec<i32> {
        let mut opcodes: Vec<i32> = self.handlers.keys().copied().collect();
        opcodes.sort_unstable();
        opcodes
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("opcodes", &self.opcodes())
            .finish()
    }
}
