//! # afio-module: default implementations
//!
//! This crate provides the default implementation for every afio-core
//! trait. Each impl prioritizes correctness and simplicity over
//! performance.
//!
//! ## Default stack
//!
//! | Trait          | Default Impl      | Alternative            |
//! |----------------|-------------------|------------------------|
//! | Worker         | ThreadWorker      | InlineWorker (testing) |
//! | WorkerFactory  | ThreadWorkerFactory | InlineWorkerFactory  |
//! | AioBackend     | UringAio          |                        |
//! | OpRouter       | ProbeRouter       |                        |
//! | Notifier       | EventFdNotifier   |                        |
//!
//! `WorkerPool` (bounded LRU set of workers) and `TaskExecutor` (the
//! per-worker handle table) are concrete; `FixedPool` and `BasicIoUring`
//! are the two execution tiers behind `UringAio`.

pub mod handle_table;
pub mod executor;
pub mod thread_worker;
pub mod inline_worker;
pub mod worker_pool;
pub mod eventfd_notifier;
pub mod probe_router;
pub mod basic_iouring;
pub mod fixed_pool;
pub mod uring_aio;

pub use executor::TaskExecutor;
pub use inline_worker::{InlineWorker, InlineWorkerFactory};
pub use thread_worker::{ThreadWorker, ThreadWorkerFactory};
pub use uring_aio::UringAio;
pub use worker_pool::{PooledWorker, WorkerPool};
