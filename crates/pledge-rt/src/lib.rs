// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Pledge runtime: the executor service under the promise bridge.
//!
//! Components:
//! - pool: work-stealing OS thread pool
//! - global: lazily started process-wide pool
//! - completion: write-once completion handle with merge/all/any
//! - config: pool sizing and naming
//! - error: pool errors, native faults, the rejection marker

pub mod completion;
pub mod config;
pub mod error;
pub mod global;
pub mod pool;
mod queue;

pub use completion::{Completion, TaskResult};
pub use config::PoolConfig;
pub use error::{ConfigError, Fault, PoolError, TaskError};
pub use global::global;
pub use pool::ThreadPool;
