// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Pool and task errors.
//!
//! Two layers. `PoolError` is what the pool API itself returns.
//! `TaskError<E>` is what a settled `Completion` carries on its failure
//! channel: either an application rejection or a native fault.

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// Errors returned by the pool API.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool no longer accepts work.
    #[error("thread pool is shut down")]
    Shutdown,

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread `{name}`")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Outstanding jobs did not drain before the deadline.
    #[error("pool did not terminate within {waited:?} ({pending} jobs outstanding)")]
    TerminationTimeout { waited: Duration, pending: usize },

    /// The shared pool is already running; configuration is fixed.
    #[error("shared pool is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Invalid pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid worker count `{value}` in {var}")]
    InvalidWorkers { var: &'static str, value: String },

    #[error("worker thread name must not be empty")]
    EmptyThreadName,
}

/// A failure intrinsic to the executor, as opposed to one the application
/// reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// Submitted work or a continuation panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Work was refused because the pool was shut down.
    #[error("task refused: thread pool is shut down")]
    PoolShutdown,

    /// The shared pool could not be started.
    #[error("shared pool unavailable: {0}")]
    Unavailable(String),

    /// An aggregate read a member that had not settled successfully.
    #[error("aggregate member read before it settled")]
    Unsettled,
}

impl Fault {
    /// Build a `Panicked` fault from a `catch_unwind` payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Fault::Panicked(panic_message(&*payload))
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The failure side of a settled `Completion`.
///
/// `Rejected` marks a failure that went through the failure channel on
/// purpose, so the original payload can be recovered with one match.
/// `Fault` is everything the executor raised on its own.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError<E> {
    #[error("rejected: {0}")]
    Rejected(E),

    #[error(transparent)]
    Fault(#[from] Fault),
}

impl<E> TaskError<E> {
    /// True if this failure carries an application payload.
    pub fn is_rejection(&self) -> bool {
        matches!(self, TaskError::Rejected(_))
    }

    /// The application payload, if any.
    pub fn rejection(&self) -> Option<&E> {
        match self {
            TaskError::Rejected(e) => Some(e),
            TaskError::Fault(_) => None,
        }
    }
}
