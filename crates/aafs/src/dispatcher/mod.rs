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

//! Task dispatch.
//!
//! The [`TaskDispatcher`] is the server's only driver of work: it activates
//! the next ready task, routes it to the [`TaskHandler`] registered for its
//! opcode, and applies the handler's [`TaskOutcome`]. A handful of opcodes
//! are reserved for the dispatcher itself.

pub mod config;
pub mod handler;
pub mod task_dispatcher;
pub mod work_distributor;

pub use config::{DispatcherConfig, DispatcherConfigBuilder};
pub use handler::{DispatchContext, FnHandler, HandlerRegistry, TaskHandler, TaskOutcome};
pub use task_dispatcher::TaskDispatcher;
pub use work_distributor::{PollingDistributor, WorkDistributor};

/// Does nothing; deleted on dispatch.
pub const OPCODE_NO_OP: i32 = 0;

/// Stops the dispatcher. Details carry `{"reason": ...}`.
pub const OPCODE_SHUTDOWN: i32 = 1;

/// Posted by the relay link when this server's role changes.
pub const OPCODE_ROLE_CHANGE: i32 = 2;

/// Opcodes below this value are reserved.
pub const FIRST_USER_OPCODE: i32 = 100;
