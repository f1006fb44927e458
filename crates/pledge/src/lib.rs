// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Pledge: promise-style deferred values over a shared thread pool.
//!
//! Callback-chained code (`resolve`/`reject`, `then`, `catch`, `all`,
//! `race`) whose work runs on background threads. Continuations run on
//! whichever thread observes their input settle.
//!
//! Components:
//! - deferred: construction, chaining, combinators
//! - resolver: task submission and the settle callbacks
//! - thenable: foreign promise-likes and `resolve` inputs
//! - outcome: settled outcomes and failure unwrapping
//! - value: payload type
//! - drain: end-of-run shutdown of the shared pool

pub mod deferred;
pub mod drain;
pub mod outcome;
pub mod resolver;
pub mod thenable;
pub mod value;

pub use deferred::{Deferred, Handler};
pub use drain::quiesce;
pub use outcome::{Handle, Outcome};
pub use pledge_rt::{Fault, PoolConfig, PoolError, TaskError, ThreadPool};
pub use resolver::{Fulfill, Reject};
pub use thenable::{Resolvable, Thenable};
pub use value::Value;
