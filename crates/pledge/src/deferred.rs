// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Deferred values: construction, chaining, and combinators.
//!
//! A `Deferred` is a thin, cloneable wrapper over one completion handle.
//! Only `Deferred::new` (and thenable adaptation) puts work on the pool.
//! Everything derived through `then`/`catch`/`all`/`race` is settled by
//! continuations on whichever thread settles its inputs.

use std::sync::Arc;

use pledge_rt::{global, Fault, TaskError, ThreadPool};

use crate::outcome::{rejection_payload, Handle, Settlement};
use crate::resolver::{self, Fulfill, Reject};
use crate::thenable::Resolvable;
use crate::value::Value;

/// A fulfillment or rejection handler. `Err` means the handler raised.
pub type Handler = Box<dyn FnOnce(Value) -> Result<Value, Value> + Send + 'static>;

/// An eventual value computed on the shared pool.
#[derive(Clone)]
pub struct Deferred {
    handle: Handle,
    /// Inputs of an `all`, in input order. Their values are assembled by
    /// the first continuation rather than when the gate settles.
    members: Option<Arc<[Handle]>>,
}

impl Deferred {
    /// Run `resolver` on the shared pool.
    ///
    /// The resolver gets a fulfill and a reject callback; the first one
    /// called settles the deferred. Returning `Err` before settling
    /// rejects with that reason. Never settling leaves it pending.
    pub fn new<R>(resolver: R) -> Self
    where
        R: FnOnce(Fulfill, Reject) -> Result<(), Value> + Send + 'static,
    {
        match global() {
            Ok(pool) => Self::new_in(&pool, resolver),
            Err(err) => {
                tracing::warn!(error = %err, "shared pool unavailable");
                Self::from_handle(Handle::faulted(Fault::Unavailable(err.to_string())))
            }
        }
    }

    /// Run `resolver` on `pool` instead of the shared pool.
    pub fn new_in<R>(pool: &ThreadPool, resolver: R) -> Self
    where
        R: FnOnce(Fulfill, Reject) -> Result<(), Value> + Send + 'static,
    {
        Self::from_handle(resolver::submit(pool, resolver))
    }

    /// Lift `value` into a deferred.
    ///
    /// A deferred comes back unchanged. A thenable is adapted through its
    /// `then` on the pool. Anything else is fulfilled immediately without
    /// touching the pool.
    pub fn resolve(value: impl Into<Resolvable>) -> Self {
        match value.into() {
            Resolvable::Deferred(d) => d,
            Resolvable::Thenable(thenable) => {
                Self::new(move |fulfill, reject| thenable.then(fulfill, reject))
            }
            Resolvable::Value(v) => Self::from_handle(Handle::completed(v)),
        }
    }

    /// An already rejected deferred.
    pub fn reject(reason: impl Into<Value>) -> Self {
        Self::from_handle(Handle::rejected(reason.into()))
    }

    /// Fulfills with every input's value, in input order, once all have
    /// fulfilled. Rejects with the first rejection observed.
    pub fn all<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Resolvable>,
    {
        let members: Vec<Handle> = items
            .into_iter()
            .map(|item| Self::resolve(item).value_handle())
            .collect();
        let gate = Handle::all_of(&members);
        Self {
            handle: gate.handle(|settled| settled.map(|()| Value::Null)),
            members: Some(members.into()),
        }
    }

    /// Settles like whichever input settles first.
    pub fn race<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Resolvable>,
    {
        let members: Vec<Handle> = items
            .into_iter()
            .map(|item| Self::resolve(item).value_handle())
            .collect();
        Self::from_handle(Handle::any_of(&members))
    }

    /// Chain handlers onto this deferred.
    ///
    /// On fulfillment, `on_fulfilled` maps the value; if it raises, this
    /// same call's `on_rejected` (when given) handles the raised reason.
    /// On rejection, `on_rejected` receives the unwrapped reason and its
    /// return fulfills the result. A missing handler passes the settlement
    /// through unchanged.
    pub fn then_with(&self, on_fulfilled: Option<Handler>, on_rejected: Option<Handler>) -> Self {
        let members = self.members.clone();
        let handle = self.handle.handle(move |settlement| {
            settle(settlement, members.as_deref(), on_fulfilled, on_rejected)
        });
        Self::from_handle(handle)
    }

    pub fn then<F>(&self, on_fulfilled: F) -> Self
    where
        F: FnOnce(Value) -> Result<Value, Value> + Send + 'static,
    {
        self.then_with(Some(Box::new(on_fulfilled)), None)
    }

    pub fn then_or<F, R>(&self, on_fulfilled: F, on_rejected: R) -> Self
    where
        F: FnOnce(Value) -> Result<Value, Value> + Send + 'static,
        R: FnOnce(Value) -> Result<Value, Value> + Send + 'static,
    {
        self.then_with(Some(Box::new(on_fulfilled)), Some(Box::new(on_rejected)))
    }

    /// `then_with(None, Some(on_rejected))`.
    pub fn catch<R>(&self, on_rejected: R) -> Self
    where
        R: FnOnce(Value) -> Result<Value, Value> + Send + 'static,
    {
        self.then_with(None, Some(Box::new(on_rejected)))
    }

    /// The underlying completion handle.
    ///
    /// For an `all` this is the gate, which fulfills with `Null`; the
    /// assembled list is only visible through a continuation.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_aggregate(&self) -> bool {
        self.members.is_some()
    }

    /// True if both wrap the same handle.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.handle.ptr_eq(&other.handle)
    }

    fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            members: None,
        }
    }

    /// A handle that settles with this deferred's observable value. Only
    /// differs from `handle` for aggregates, whose gate carries no value.
    fn value_handle(&self) -> Handle {
        if self.is_aggregate() {
            self.then_with(None, None).handle
        } else {
            self.handle.clone()
        }
    }
}

impl std::fmt::Debug for Deferred {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("settled", &self.handle.is_done())
            .field("members", &self.members.as_ref().map(|m| m.len()))
            .finish()
    }
}

/// Route one settlement through a pair of optional handlers.
fn settle(
    settlement: Settlement,
    members: Option<&[Handle]>,
    on_fulfilled: Option<Handler>,
    on_rejected: Option<Handler>,
) -> Settlement {
    let settlement = match (settlement, members) {
        (Ok(_), Some(members)) => collect(members),
        (settlement, _) => settlement,
    };

    match settlement {
        Ok(value) => match on_fulfilled {
            Some(on_fulfilled) => match on_fulfilled(value) {
                Ok(next) => Ok(next),
                Err(raised) => match on_rejected {
                    Some(on_rejected) => on_rejected(raised).map_err(TaskError::Rejected),
                    None => Err(TaskError::Rejected(raised)),
                },
            },
            None => Ok(value),
        },
        Err(error) => match on_rejected {
            Some(on_rejected) => on_rejected(rejection_payload(error)).map_err(TaskError::Rejected),
            None => Err(error),
        },
    }
}

/// Values of settled `all` members, in input order.
fn collect(members: &[Handle]) -> Settlement {
    members
        .iter()
        .map(|member| member.peek().unwrap_or(Err(Fault::Unsettled.into())))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::List)
}
