// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! End-of-run drain for the shared pool.

use std::time::Duration;

use pledge_rt::{global, PoolError};

/// Detach the shared pool and wait up to `timeout` for everything already
/// submitted to it, including the continuations those tasks settle.
///
/// Later deferreds start a fresh pool. Resolvers that never settle do not
/// hold this up; their deferreds simply stay pending.
pub fn quiesce(timeout: Duration) -> Result<(), PoolError> {
    match global::reset() {
        Some(pool) => pool.shutdown_timeout(timeout),
        None => Ok(()),
    }
}
