//! Worker abstraction (worker-pool backend).
//!
//! A `Worker` executes [`Task`]s one at a time against its private handle
//! table. Workers may block; that is the whole point.
//!
//! # Implementors
//!
//! - `ThreadWorker` (default): one OS thread with a bounded inbox.
//!
//! - `InlineWorker` (testing): executes synchronously in the caller.
//!   Only for tests; it blocks the event loop.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::TaskError;
use crate::task::{Task, TaskOutput};

pub type TaskFuture = BoxFuture<'static, Result<TaskOutput, TaskError>>;

/// Executes tasks off the caller's thread.
///
/// **Contract:**
/// - `enqueue()` must NEVER block the caller. The task is handed to the
///   worker before `enqueue` returns; dropping the returned future
///   discards the result but the task still runs.
/// - Tasks enqueued on one worker execute in enqueue order.
/// - A killed worker never runs another task; `is_running` turns false
///   and stays false.
pub trait Worker: Send + Sync {
    /// Stable id, unique within its pool.
    fn id(&self) -> usize;

    fn enqueue(&self, task: Task) -> TaskFuture;

    fn is_running(&self) -> bool;

    /// Tasks accepted but not yet finished.
    fn pending(&self) -> usize;

    /// Stop the worker. Queued tasks are rejected; open handles are lost.
    fn kill(&self);
}

/// Spawns workers for a pool.
pub trait WorkerFactory: Send + Sync {
    fn create(&self, id: usize) -> Result<Arc<dyn Worker>, TaskError>;
}
