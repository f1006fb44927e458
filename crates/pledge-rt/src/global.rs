// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Process-wide shared pool.
//!
//! Created lazily on first use. `reset` detaches the current pool so the
//! next `global()` call builds a fresh one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::pool::ThreadPool;

struct Registry {
    pool: Option<Arc<ThreadPool>>,
    config: Option<PoolConfig>,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    pool: None,
    config: None,
});

fn registry() -> MutexGuard<'static, Registry> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The shared pool, started on first call.
///
/// Uses the configuration installed by `configure`, else
/// `PoolConfig::from_env()`, else defaults.
pub fn global() -> Result<Arc<ThreadPool>, PoolError> {
    let mut reg = registry();
    if let Some(pool) = &reg.pool {
        if !pool.is_shutdown() {
            return Ok(pool.clone());
        }
    }
    let config = match &reg.config {
        Some(config) => config.clone(),
        None => PoolConfig::from_env().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "ignoring invalid pool environment");
            PoolConfig::default()
        }),
    };
    let pool = Arc::new(ThreadPool::new(config)?);
    reg.pool = Some(pool.clone());
    Ok(pool)
}

/// Install the configuration for the next lazily created pool.
pub fn configure(config: PoolConfig) -> Result<(), PoolError> {
    config.validate()?;
    let mut reg = registry();
    if reg.pool.as_ref().is_some_and(|p| !p.is_shutdown()) {
        return Err(PoolError::AlreadyRunning);
    }
    reg.config = Some(config);
    Ok(())
}

/// Detach the current shared pool, if any, and hand it back so the caller
/// can shut it down. Work already submitted to it keeps running.
pub fn reset() -> Option<Arc<ThreadPool>> {
    let pool = registry().pool.take();
    if pool.is_some() {
        tracing::debug!("shared pool detached");
    }
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    // The registry is process-wide; keep every assertion about it in one
    // test so parallel tests cannot interleave.
    #[test]
    fn lifecycle() {
        if let Some(old) = reset() {
            old.shutdown();
        }

        configure(PoolConfig::with_workers(2)).unwrap();
        let a = global().unwrap();
        let b = global().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.worker_count(), 2);
        assert!(matches!(
            configure(PoolConfig::with_workers(3)),
            Err(PoolError::AlreadyRunning)
        ));

        let (tx, rx) = mpsc::channel();
        a.execute(move || tx.send(1).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);

        let detached = reset().unwrap();
        assert!(Arc::ptr_eq(&detached, &a));
        detached.shutdown();

        configure(PoolConfig::with_workers(3)).unwrap();
        let fresh = global().unwrap();
        assert!(!Arc::ptr_eq(&fresh, &a));
        assert_eq!(fresh.worker_count(), 3);

        // A pool shut down in place is replaced on next use.
        fresh.shutdown();
        let replaced = global().unwrap();
        assert!(!Arc::ptr_eq(&replaced, &fresh));
        assert!(!replaced.is_shutdown());
    }
}
