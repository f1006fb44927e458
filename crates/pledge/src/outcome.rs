// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Settled outcomes and failure unwrapping.

use pledge_rt::{Completion, TaskError, TaskResult};

use crate::value::Value;

/// The completion handle every deferred wraps.
pub type Handle = Completion<Value, Value>;

/// Raw settled state of a handle.
pub type Settlement = TaskResult<Value, Value>;

/// A settled deferred: exactly one of a value or a reason.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure(Value),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    pub fn value(&self) -> &Value {
        match self {
            Outcome::Success(v) | Outcome::Failure(v) => v,
        }
    }

    pub fn into_result(self) -> Result<Value, Value> {
        match self {
            Outcome::Success(v) => Ok(v),
            Outcome::Failure(v) => Err(v),
        }
    }
}

impl From<Settlement> for Outcome {
    fn from(settlement: Settlement) -> Self {
        match settlement {
            Ok(value) => Outcome::Success(value),
            Err(error) => Outcome::Failure(rejection_payload(error)),
        }
    }
}

/// The payload a rejection handler sees: the original reason for a
/// marked rejection, the fault itself for anything the executor raised.
pub fn rejection_payload(error: TaskError<Value>) -> Value {
    match error {
        TaskError::Rejected(reason) => reason,
        TaskError::Fault(fault) => Value::Fault(fault),
    }
}
