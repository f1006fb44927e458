// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task submission: run a resolver on the pool and capture how it settles.
//!
//! `Fulfill` and `Reject` both write into the same write-once handle, so
//! whichever is called first wins and every later call is a no-op. The
//! handle's lock is the critical section shared by the submitting thread,
//! the worker running the resolver, and any thread a callback escapes to.

use pledge_rt::{TaskError, ThreadPool};

use crate::outcome::Handle;
use crate::value::Value;

/// Settles its deferred with a value.
#[derive(Clone)]
pub struct Fulfill {
    handle: Handle,
}

/// Settles its deferred with a reason.
#[derive(Clone)]
pub struct Reject {
    handle: Handle,
}

impl Fulfill {
    /// Returns `false` if the deferred had already settled.
    pub fn call(&self, value: impl Into<Value>) -> bool {
        let took = self.handle.complete(Ok(value.into()));
        if !took {
            tracing::trace!("fulfill ignored: already settled");
        }
        took
    }
}

impl Reject {
    /// Returns `false` if the deferred had already settled.
    pub fn call(&self, reason: impl Into<Value>) -> bool {
        let took = self.handle.complete(Err(TaskError::Rejected(reason.into())));
        if !took {
            tracing::trace!("reject ignored: already settled");
        }
        took
    }
}

impl std::fmt::Debug for Fulfill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fulfill").field("handle", &self.handle).finish()
    }
}

impl std::fmt::Debug for Reject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reject").field("handle", &self.handle).finish()
    }
}

/// The pair of settle callbacks handed to a resolver.
pub(crate) fn callbacks(handle: &Handle) -> (Fulfill, Reject) {
    (
        Fulfill {
            handle: handle.clone(),
        },
        Reject {
            handle: handle.clone(),
        },
    )
}

/// Submit `resolver` to `pool`; the returned handle settles however the
/// resolver reports.
///
/// An `Err` from the resolver rejects with that reason (if nothing settled
/// first). A panic settles with `Fault::Panicked`. A refused submission
/// settles with `Fault::PoolShutdown`. A resolver that never settles
/// leaves the handle pending.
pub(crate) fn submit<R>(pool: &ThreadPool, resolver: R) -> Handle
where
    R: FnOnce(Fulfill, Reject) -> Result<(), Value> + Send + 'static,
{
    Handle::spawn(pool, move |handle| {
        let (fulfill, reject) = callbacks(&handle);
        resolver(fulfill, reject)
    })
}
