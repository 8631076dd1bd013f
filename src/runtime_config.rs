//! # Runtime Configuration Module
//!
//! Environment-driven settings for the coroutine runtime that carries
//! transport tasks.
//!
//! ## Environment Variables
//!
//! ### `BRRTR_STACK_SIZE`
//!
//! Stack size for per-connection coroutines. Accepts decimal (`32768`) or
//! hexadecimal (`0x8000`). Default: `0x8000` (32 KB).
//!
//! Handlers run on the connection coroutine's stack, so deep handler call
//! chains or large locals need a bigger value. Total virtual memory is roughly
//! `stack_size × concurrent connections`.
//!
//! ### `BRRTR_WORKERS`
//!
//! Number of scheduler threads for the `may` runtime. Default: the number of
//! available CPUs.
//!
//! ## Usage
//!
//! ```rust
//! use brrtcore::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! config.apply();
//! ```

use std::env;

const DEFAULT_STACK_SIZE: usize = 0x8000;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Stack size for coroutines in bytes.
    pub stack_size: usize,
    /// Scheduler worker threads; `None` keeps the runtime default.
    pub workers: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            workers: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let stack_size = env::var("BRRTR_STACK_SIZE")
            .ok()
            .and_then(|v| parse_size(&v))
            .unwrap_or(DEFAULT_STACK_SIZE);
        let workers = env::var("BRRTR_WORKERS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .filter(|n: &usize| *n > 0);
        RuntimeConfig {
            stack_size,
            workers,
        }
    }

    /// Push these settings into the global `may` configuration.
    ///
    /// Call before the first coroutine is spawned.
    pub fn apply(&self) {
        let cfg = may::config();
        cfg.set_stack_size(self.stack_size);
        if let Some(workers) = self.workers {
            cfg.set_workers(workers);
        }
    }
}

fn parse_size(value: &str) -> Option<usize> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}
