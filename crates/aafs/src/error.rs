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

//! Error types for the coordination layer.
//!
//! Errors are grouped by the layer that raises them:
//!
//! - [`StoreError`]: anything that goes wrong talking to the shared store,
//!   plus the precondition failures the store enforces (claims, confirmations).
//! - [`HandlerError`]: failures reported by task handlers.
//! - [`DispatchError`]: failures surfaced by the task dispatcher.
//! - [`RelayError`]: relay payload decoding and relay thread/link failures.
//!
//! Contention outcomes (a claim that found nothing, a relay write that lost the
//! last-writer-wins comparison) are not errors and are reported as `Ok(None)`.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The connection pool could not hand out a connection, or the pooled
    /// interaction was aborted.
    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    /// A query failed inside the database.
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Migrations could not be applied.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The store is not reachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The connection string does not name a supported backend.
    #[error("Unsupported connection string '{0}': expected memory://, sqlite://, a file path or :memory:")]
    UnsupportedUrl(String),

    /// A backend-specific operation was invoked on the other backend.
    #[error("Operation requires the {expected} backend")]
    BackendMismatch { expected: &'static str },

    /// A stored payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row holds a value that cannot be represented in memory.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// Stage or delete was attempted on a task whose claim is not held by the caller.
    #[error("Task {task_id} is not activated by this caller")]
    NotClaimed { task_id: Uuid },

    /// A destructive administrative operation was invoked without the
    /// required confirmation phrase.
    #[error("Confirmation phrase does not match; refusing to {operation}")]
    ConfirmationRequired { operation: String },

    /// A change feed subscriber fell behind and missed writes.
    #[error("Change feed subscriber lagged and skipped {0} writes")]
    FeedLagged(u64),
}

impl StoreError {
    /// Returns true for failures that may clear up on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::ConnectionPool(_)
                | StoreError::Database(_)
                | StoreError::Unavailable(_)
                | StoreError::FeedLagged(_)
        )
    }

    /// Returns true for caller bugs. These are never retried.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            StoreError::NotClaimed { .. } | StoreError::ConfirmationRequired { .. }
        )
    }
}

/// Errors returned by task handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler gave up on the task.
    #[error("Task handler failed: {0}")]
    Failed(String),

    /// The handler hit a store failure.
    #[error("Store error in handler: {0}")]
    Store(#[from] StoreError),

    /// A relay operation inside the handler failed.
    #[error("Relay error in handler: {0}")]
    Relay(#[from] RelayError),
}

/// Errors surfaced by the task dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Activating, staging or deleting a task failed in the store.
    #[error("Store error during dispatch: {0}")]
    Store(#[from] StoreError),

    /// The dispatcher has been shut down.
    #[error("Dispatcher is shut down")]
    Shutdown,
}

impl DispatchError {
    /// Returns true when the dispatch loop should keep going after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Store(e) => e.is_retryable(),
            DispatchError::Shutdown => false,
        }
    }
}

/// Errors raised by the relay subsystem.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A relay store operation failed.
    #[error("Store error in relay: {0}")]
    Store(#[from] StoreError),

    /// A relay item was decoded as a payload kind other than the one its id classifies as.
    #[error("Relay item '{relay_id}' is a {found} item, expected {expected}")]
    PayloadMismatch {
        relay_id: String,
        expected: String,
        found: String,
    },

    /// A relay id does not carry a recognised kind prefix.
    #[error("Relay item '{0}' has no recognised kind")]
    UnknownKind(String),

    /// A relay payload failed to decode.
    #[error("Relay payload for '{relay_id}' is malformed: {source}")]
    MalformedPayload {
        relay_id: String,
        #[source]
        source: serde_json::Error,
    },

    /// The relay thread could not be started.
    #[error("Relay thread could not be started: {0}")]
    ThreadStart(String),
}

impl RelayError {
    /// Returns true for caller bugs. These are never retried.
    pub fn is_precondition(&self) -> bool {
        match self {
            RelayError::Store(e) => e.is_precondition(),
            RelayError::PayloadMismatch { .. } | RelayError::UnknownKind(_) => true,
            RelayError::MalformedPayload { .. } | RelayError::ThreadStart(_) => false,
        }
    }
}
