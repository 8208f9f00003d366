//! `ThreadWorker`: default `Worker` implementation.
//!
//! One OS thread per worker. The caller pushes envelopes into a lock-free
//! unbounded inbox and unparks the thread; the thread runs each task on its
//! own [`TaskExecutor`] and answers through a oneshot channel.
//!
//! ```text
//!   enqueue(task) ──► SegQueue<Envelope> ──► worker_loop ──► executor.run
//!        ▲                                                      │
//!        └───────────────── oneshot reply ◄─────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};

use afio_core::error::TaskError;
use afio_core::task::{Task, TaskOutput};
use afio_core::worker::{TaskFuture, Worker, WorkerFactory};
use crossbeam_queue::SegQueue;
use futures::future::{self, FutureExt};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::executor::TaskExecutor;

type Reply = oneshot::Sender<Result<TaskOutput, TaskError>>;

struct Envelope {
    task: Task,
    reply: Reply,
}

/// Shared state between the handle and the worker thread.
struct WorkerShared {
    /// Never full, so an accepted handle can always reach its `Close`.
    inbox: SegQueue<Envelope>,
    running: AtomicBool,
    pending: AtomicUsize,
}

pub struct ThreadWorker {
    id: usize,
    shared: Arc<WorkerShared>,
    thread: Thread,
}

impl ThreadWorker {
    pub fn spawn(id: usize) -> Result<Self, TaskError> {
        let shared = Arc::new(WorkerShared {
            inbox: SegQueue::new(),
            running: AtomicBool::new(true),
            pending: AtomicUsize::new(0),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("afio-worker-{}", id))
            .spawn(move || worker_loop(thread_shared, id))
            .map_err(|e| TaskError::from_io("Could not spawn a worker thread.", &e))?;

        debug!(worker = id, "worker spawned");
        Ok(Self {
            id,
            shared,
            thread: handle.thread().clone(),
        })
    }
}

impl Worker for ThreadWorker {
    fn id(&self) -> usize {
        self.id
    }

    fn enqueue(&self, task: Task) -> TaskFuture {
        if !self.shared.running.load(Ordering::Acquire) {
            return future::ready(Err(TaskError::new("The worker is not running."))).boxed();
        }

        let (reply, rx) = oneshot::channel();
        trace!(worker = self.id, task = task.name(), "enqueue");
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.shared.inbox.push(Envelope { task, reply });
        self.thread.unpark();

        async move {
            rx.await.unwrap_or_else(|_| {
                Err(TaskError::new(
                    "The worker terminated before completing the task.",
                ))
            })
        }
        .boxed()
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    fn kill(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            debug!(worker = self.id, "worker killed");
        }
        // Dropping the envelopes rejects their futures.
        while let Some(envelope) = self.shared.inbox.pop() {
            drop(envelope);
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
        }
        self.thread.unpark();
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        // The thread exits on its next wake-up. We don't join here to
        // avoid blocking the event loop.
        self.kill();
    }
}

/// Marks the worker dead however the thread exits, panics included.
struct ExitGuard(Arc<WorkerShared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

/// Worker thread main loop.
fn worker_loop(shared: Arc<WorkerShared>, id: usize) {
    let _guard = ExitGuard(Arc::clone(&shared));
    let mut executor = TaskExecutor::new();

    while shared.running.load(Ordering::Acquire) {
        match shared.inbox.pop() {
            Some(Envelope { task, reply }) => {
                let name = task.name();
                let result = executor.run(task);
                trace!(worker = id, task = name, ok = result.is_ok(), "task finished");
                shared.pending.fetch_sub(1, Ordering::AcqRel);
                // The caller may have stopped waiting; the work is done anyway.
                let _ = reply.send(result);
            }
            None => thread::park(),
        }
    }

    debug!(worker = id, open_files = executor.open_files(), "worker exiting");
}

/// Spawns [`ThreadWorker`]s for a `WorkerPool`.
#[derive(Debug, Default)]
pub struct ThreadWorkerFactory;

impl ThreadWorkerFactory {
    pub fn new() -> Self {
        Self
    }
}

impl WorkerFactory for ThreadWorkerFactory {
    fn create(&self, id: usize) -> Result<Arc<dyn Worker>, TaskError> {
        Ok(Arc::new(ThreadWorker::spawn(id)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afio_core::OpenMode;

    #[tokio::test]
    async fn runs_tasks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let worker = ThreadWorker::spawn(0).unwrap();

        let (handle, _, _) = worker
            .enqueue(Task::Open {
                path: dir.path().join("f"),
                mode: OpenMode::parse("w+").unwrap(),
            })
            .await
            .unwrap()
            .into_opened()
            .unwrap();

        // Enqueued back to back, awaited out of order.
        let first = worker.enqueue(Task::Write { handle, data: b"ab".to_vec() });
        let second = worker.enqueue(Task::Write { handle, data: b"cd".to_vec() });
        assert_eq!(second.await.unwrap(), TaskOutput::Written(2));
        assert_eq!(first.await.unwrap(), TaskOutput::Written(2));

        worker.enqueue(Task::Close { handle }).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("f")).unwrap(), b"abcd");
        assert_eq!(worker.pending(), 0);
    }

    #[tokio::test]
    async fn killed_worker_rejects_tasks() {
        let worker = ThreadWorker::spawn(1).unwrap();
        assert!(worker.is_running());
        worker.kill();
        assert!(!worker.is_running());

        let err = worker
            .enqueue(Task::IsDir { path: "/".into() })
            .await
            .unwrap_err();
        assert_eq!(err.message, "The worker is not running.");
    }

    #[tokio::test]
    async fn dropped_future_still_runs_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("made");
        let worker = ThreadWorker::spawn(2).unwrap();

        drop(worker.enqueue(Task::Mkdir { path: path.clone(), mode: 0o755 }));
        // Same worker, so this runs after the mkdir.
        let exists = worker
            .enqueue(Task::IsDir { path })
            .await
            .unwrap()
            .into_flag()
            .unwrap();
        assert!(exists);
    }

    #[tokio::test]
    async fn deep_backlog_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let worker = ThreadWorker::spawn(3).unwrap();

        let pending: Vec<_> = (0..1000)
            .map(|_| worker.enqueue(Task::IsDir { path: dir.path().to_path_buf() }))
            .collect();
        for result in futures::future::join_all(pending).await {
            assert!(result.unwrap().into_flag().unwrap());
        }
        assert_eq!(worker.pending(), 0);
    }
}
