//! afio configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! ```rust,ignore
//! use afio_core::AfioConfig;
//!
//! // Defaults with env overrides
//! let config = AfioConfig::from_env();
//!
//! // Or customize programmatically
//! let config = AfioConfig::new().max_workers(2).disable_uring(true);
//! ```

use crate::env::{env_get, env_get_bool};

pub mod defaults {
    /// Upper bound of the worker pool.
    pub const MAX_WORKERS: usize = 8;
    /// io_uring submission queue entries.
    pub const SQ_ENTRIES: u32 = 128;
    /// Threads in the native facility's blocking tier.
    pub const BLOCKING_THREADS: usize = 4;
    pub const DISABLE_URING: bool = false;
}

/// Configuration shared by both drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfioConfig {
    pub max_workers: usize,
    pub sq_entries: u32,
    pub blocking_threads: usize,
    /// Route every native op to the blocking tier.
    pub disable_uring: bool,
}

impl Default for AfioConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl AfioConfig {
    /// Library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `AFIO_MAX_WORKERS` - Worker pool maximum
    /// - `AFIO_SQ_ENTRIES` - io_uring submission queue size
    /// - `AFIO_BLOCKING_THREADS` - Blocking-tier threads
    /// - `AFIO_DISABLE_URING` - Force the blocking tier (0/1)
    pub fn from_env() -> Self {
        Self {
            max_workers: env_get("AFIO_MAX_WORKERS", defaults::MAX_WORKERS),
            sq_entries: env_get("AFIO_SQ_ENTRIES", defaults::SQ_ENTRIES),
            blocking_threads: env_get("AFIO_BLOCKING_THREADS", defaults::BLOCKING_THREADS),
            disable_uring: env_get_bool("AFIO_DISABLE_URING", defaults::DISABLE_URING),
        }
        .sanitized()
    }

    /// Explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            max_workers: defaults::MAX_WORKERS,
            sq_entries: defaults::SQ_ENTRIES,
            blocking_threads: defaults::BLOCKING_THREADS,
            disable_uring: defaults::DISABLE_URING,
        }
    }

    // Builder methods

    pub fn max_workers(mut self, n: usize) -> Self {
        self.max_workers = n.max(1);
        self
    }

    pub fn sq_entries(mut self, entries: u32) -> Self {
        self.sq_entries = entries.max(1);
        self
    }

    pub fn blocking_threads(mut self, n: usize) -> Self {
        self.blocking_threads = n.max(1);
        self
    }

    pub fn disable_uring(mut self, disable: bool) -> Self {
        self.disable_uring = disable;
        self
    }

    // Zero-sized pools cannot make progress.
    fn sanitized(mut self) -> Self {
        self.max_workers = self.max_workers.max(1);
        self.sq_entries = self.sq_entries.max(1);
        self.blocking_threads = self.blocking_threads.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_uses_library_defaults() {
        let config = AfioConfig::new();
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.sq_entries, 128);
        assert_eq!(config.blocking_threads, 4);
        assert!(!config.disable_uring);
    }

    #[test]
    fn builder_clamps_zero() {
        let config = AfioConfig::new().max_workers(0).blocking_threads(0);
        assert_eq!(config.max_workers, 1);
        assert_eq!(config.blocking_threads, 1);
    }

    #[test]
    fn env_overrides_defaults() {
        std::env::set_var("AFIO_SQ_ENTRIES", "32");
        let config = AfioConfig::from_env();
        assert_eq!(config.sq_entries, 32);
        std::env::remove_var("AFIO_SQ_ENTRIES");
    }
}
