// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Pool configuration.
//!
//! Deserializable so embedders can carry it in their own config files;
//! `from_env` covers the zero-config case.

use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable holding the worker count.
pub const WORKERS_VAR: &str = "PLEDGE_WORKERS";
/// Environment variable holding the worker thread name prefix.
pub const THREAD_NAME_VAR: &str = "PLEDGE_THREAD_NAME";

const DEFAULT_THREAD_NAME: &str = "pledge-worker";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads. `0` means one per available core.
    pub workers: usize,
    /// Prefix for worker thread names; the worker index is appended.
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl PoolConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Defaults overridden by `PLEDGE_WORKERS` / `PLEDGE_THREAD_NAME`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(WORKERS_VAR) {
            config.workers = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidWorkers {
                    var: WORKERS_VAR,
                    value: raw.clone(),
                })?;
        }
        if let Some(name) = lookup(THREAD_NAME_VAR) {
            config.thread_name = name;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::EmptyThreadName);
        }
        Ok(())
    }

    /// Worker count with `0` resolved against the host.
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            self.workers
        }
    }
}
