// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Foreign promise-likes and the inputs `resolve` accepts.

use std::sync::Arc;

use crate::deferred::Deferred;
use crate::resolver::{Fulfill, Reject};
use crate::value::Value;

/// Anything that can report a single eventual outcome through a pair of
/// callbacks.
///
/// `then` attaches the callbacks; an `Err` return means attaching failed
/// and rejects the adapted deferred with that reason.
pub trait Thenable: Send + Sync {
    fn then(&self, fulfill: Fulfill, reject: Reject) -> Result<(), Value>;
}

impl<F> Thenable for F
where
    F: Fn(Fulfill, Reject) -> Result<(), Value> + Send + Sync,
{
    fn then(&self, fulfill: Fulfill, reject: Reject) -> Result<(), Value> {
        self(fulfill, reject)
    }
}

/// Input to `resolve`, `all` and `race`.
#[derive(Clone)]
pub enum Resolvable {
    /// Used as is.
    Deferred(Deferred),
    /// Adapted through its `then`.
    Thenable(Arc<dyn Thenable>),
    /// Wrapped as already fulfilled.
    Value(Value),
}

impl Resolvable {
    pub fn thenable<T: Thenable + 'static>(thenable: T) -> Self {
        Resolvable::Thenable(Arc::new(thenable))
    }
}

impl std::fmt::Debug for Resolvable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolvable::Deferred(d) => f.debug_tuple("Deferred").field(d).finish(),
            Resolvable::Thenable(_) => write!(f, "Thenable(..)"),
            Resolvable::Value(v) => f.debug_tuple("Value").field(v).finish(),
        }
    }
}

impl From<Deferred> for Resolvable {
    fn from(d: Deferred) -> Self {
        Resolvable::Deferred(d)
    }
}

impl From<&Deferred> for Resolvable {
    fn from(d: &Deferred) -> Self {
        Resolvable::Deferred(d.clone())
    }
}

impl From<Arc<dyn Thenable>> for Resolvable {
    fn from(t: Arc<dyn Thenable>) -> Self {
        Resolvable::Thenable(t)
    }
}

macro_rules! resolvable_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Resolvable {
                fn from(v: $ty) -> Self {
                    Resolvable::Value(Value::from(v))
                }
            }
        )*
    };
}

resolvable_from_value!(Value, (), bool, i32, i64, f64, &str, String, Vec<Value>);
