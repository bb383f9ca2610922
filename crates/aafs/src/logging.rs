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

//! Tracing subscriber setup shared by the library, its tests and `aafsctl`.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs a global `tracing` subscriber.
///
/// With `Some(level)` the filter is pinned to that level. With `None` the
/// filter is read from `RUST_LOG`, falling back to `info`. Calling this more
/// than once is harmless; later calls leave the first subscriber in place.
pub fn init_logging(level: Option<Level>) {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(build_filter(level))
        .try_init();
}

fn build_filter(level: Option<Level>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::new(level.as_str().to_lowercase()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}
