//! `InlineWorker`: executes tasks synchronously in the caller.
//!
//! Only for tests. It blocks the event loop, but makes the worker-pool
//! driver deterministic and lets a test inject failures by task name.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use afio_core::error::TaskError;
use afio_core::task::Task;
use afio_core::worker::{TaskFuture, Worker, WorkerFactory};
use futures::future::{self, FutureExt};

use crate::executor::TaskExecutor;

pub struct InlineWorker {
    id: usize,
    executor: Mutex<TaskExecutor>,
    running: AtomicBool,
    failing: Arc<Mutex<HashSet<&'static str>>>,
    executed: AtomicUsize,
}

impl InlineWorker {
    pub fn new(id: usize) -> Self {
        Self::with_failures(id, Arc::default())
    }

    fn with_failures(id: usize, failing: Arc<Mutex<HashSet<&'static str>>>) -> Self {
        Self {
            id,
            executor: Mutex::new(TaskExecutor::new()),
            running: AtomicBool::new(true),
            failing,
            executed: AtomicUsize::new(0),
        }
    }

    /// Tasks executed so far.
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::Acquire)
    }
}

impl Worker for InlineWorker {
    fn id(&self) -> usize {
        self.id
    }

    fn enqueue(&self, task: Task) -> TaskFuture {
        if !self.is_running() {
            return future::ready(Err(TaskError::new("The worker is not running."))).boxed();
        }
        let injected = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(task.name());
        let result = if injected {
            Err(TaskError::new(format!("Injected failure for {}.", task.name())))
        } else {
            self.executor
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .run(task)
        };
        self.executed.fetch_add(1, Ordering::AcqRel);
        future::ready(result).boxed()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn pending(&self) -> usize {
        0
    }

    fn kill(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Creates [`InlineWorker`]s and remembers them for inspection.
#[derive(Default)]
pub struct InlineWorkerFactory {
    created: Mutex<Vec<Arc<InlineWorker>>>,
    failing: Arc<Mutex<HashSet<&'static str>>>,
}

impl InlineWorkerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every task named `name` (see `Task::name`) fail on all workers.
    pub fn fail(&self, name: &'static str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name);
    }

    pub fn heal(&self, name: &'static str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    pub fn created(&self) -> Vec<Arc<InlineWorker>> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl WorkerFactory for InlineWorkerFactory {
    fn create(&self, id: usize) -> Result<Arc<dyn Worker>, TaskError> {
        let worker = Arc::new(InlineWorker::with_failures(id, Arc::clone(&self.failing)));
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&worker));
        Ok(worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_failures_apply_to_named_tasks() {
        let factory = InlineWorkerFactory::new();
        let worker = factory.create(0).unwrap();
        factory.fail("isdir");

        assert!(worker.enqueue(Task::IsDir { path: "/".into() }).await.is_err());
        assert!(worker.enqueue(Task::IsFile { path: "/".into() }).await.is_ok());

        factory.heal("isdir");
        assert!(worker.enqueue(Task::IsDir { path: "/".into() }).await.is_ok());
        assert_eq!(factory.created()[0].executed(), 3);
    }
}
