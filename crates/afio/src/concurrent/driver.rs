//! `ConcurrentDriver`: the worker-pool driver.
//!
//! Each call becomes one [`Task`]. Opens keep their worker for the life of
//! the file; path operations borrow a pooled worker for a single task.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use afio_core::config::AfioConfig;
use afio_core::driver::Driver;
use afio_core::error::{FileError, Result};
use afio_core::file::File;
use afio_core::mode::OpenMode;
use afio_core::stat::StatRecord;
use afio_core::task::{Task, TaskOutput};
use afio_module::{ThreadWorkerFactory, WorkerPool};
use async_trait::async_trait;
use tracing::trace;

use super::file::ConcurrentFile;
use crate::chain::detached;

pub struct ConcurrentDriver {
    pool: Arc<WorkerPool>,
}

impl ConcurrentDriver {
    /// Driver over a pool of thread workers sized by `config`.
    pub fn new(config: &AfioConfig) -> Self {
        let factory = Arc::new(ThreadWorkerFactory::new());
        Self::with_pool(Arc::new(WorkerPool::new(factory, config.max_workers)))
    }

    pub fn with_pool(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Run one task on a borrowed worker.
    async fn run(&self, task: Task, context: &'static str) -> Result<TaskOutput> {
        let worker = self
            .pool
            .acquire()
            .map_err(|e| FileError::task(context, e))?;
        trace!(task = task.name(), worker = worker.id(), "dispatching");
        worker
            .enqueue(task)
            .await
            .map_err(|e| FileError::task(context, e))
    }

    async fn run_done(&self, task: Task, context: &'static str) -> Result<()> {
        self.run(task, context)
            .await?
            .into_done()
            .map_err(|e| FileError::task(context, e))
    }
}

#[async_trait]
impl Driver for ConcurrentDriver {
    async fn open(&self, path: &Path, mode: &str) -> Result<Box<dyn File>> {
        let mode = OpenMode::parse(mode)?;
        let context = "Opening the file failed.";
        let worker = self
            .pool
            .acquire()
            .map_err(|e| FileError::open(context, e))?;
        let path = path.to_path_buf();
        let pending = worker.enqueue(Task::Open {
            path: path.clone(),
            mode,
        });

        // Detached so a dropped caller still gets the handle closed.
        let file = detached(
            async move {
                let (handle, size, append) = pending
                    .await
                    .and_then(TaskOutput::into_opened)
                    .map_err(|e| FileError::open(context, e))?;
                Ok(ConcurrentFile::new(
                    worker,
                    handle,
                    path,
                    size,
                    append,
                    mode.readable(),
                    mode.writable(),
                ))
            },
            None,
        )
        .await?;
        Ok(Box::new(file))
    }

    async fn unlink(&self, path: &Path) -> Result<()> {
        let task = Task::Unlink {
            path: path.to_path_buf(),
        };
        self.run_done(task, "Unlinking the file failed.").await
    }

    async fn stat(&self, path: &Path) -> Result<StatRecord> {
        let context = "Stating the file failed.";
        let task = Task::Stat {
            path: path.to_path_buf(),
        };
        self.run(task, context)
            .await?
            .into_stat()
            .map_err(|e| FileError::task(context, e))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let task = Task::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        };
        self.run_done(task, "Renaming the file failed.").await
    }

    async fn link(&self, source: &Path, target: &Path) -> Result<()> {
        let task = Task::Link {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
        };
        self.run_done(task, "Creating the link failed.").await
    }

    async fn symlink(&self, source: &Path, target: &Path) -> Result<()> {
        let task = Task::Symlink {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
        };
        self.run_done(task, "Creating the symlink failed.").await
    }

    async fn readlink(&self, path: &Path) -> Result<PathBuf> {
        let context = "Reading the symlink failed.";
        let task = Task::Readlink {
            path: path.to_path_buf(),
        };
        self.run(task, context)
            .await?
            .into_path()
            .map_err(|e| FileError::task(context, e))
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<u64> {
        let context = "Copying the file failed.";
        let task = Task::Copy {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        };
        self.run(task, context)
            .await?
            .into_copied()
            .map_err(|e| FileError::task(context, e))
    }

    async fn is_file(&self, path: &Path) -> Result<bool> {
        let context = "Checking the path failed.";
        let task = Task::IsFile {
            path: path.to_path_buf(),
        };
        self.run(task, context)
            .await?
            .into_flag()
            .map_err(|e| FileError::task(context, e))
    }

    async fn is_dir(&self, path: &Path) -> Result<bool> {
        let context = "Checking the path failed.";
        let task = Task::IsDir {
            path: path.to_path_buf(),
        };
        self.run(task, context)
            .await?
            .into_flag()
            .map_err(|e| FileError::task(context, e))
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        let task = Task::Mkdir {
            path: path.to_path_buf(),
            mode,
        };
        self.run_done(task, "Creating the directory failed.").await
    }

    async fn lsdir(&self, path: &Path) -> Result<Vec<String>> {
        let context = "Reading the directory failed.";
        let task = Task::Lsdir {
            path: path.to_path_buf(),
        };
        self.run(task, context)
            .await?
            .into_names()
            .map_err(|e| FileError::task(context, e))
    }

    async fn rmdir(&self, path: &Path) -> Result<()> {
        let task = Task::Rmdir {
            path: path.to_path_buf(),
        };
        self.run_done(task, "Removing the directory failed.").await
    }

    async fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        let task = Task::Chmod {
            path: path.to_path_buf(),
            mode,
        };
        self.run_done(task, "Changing the file mode failed.").await
    }

    async fn chown(&self, path: &Path, uid: u32) -> Result<()> {
        let task = Task::Chown {
            path: path.to_path_buf(),
            uid,
        };
        self.run_done(task, "Changing the file owner failed.").await
    }

    async fn chgrp(&self, path: &Path, gid: u32) -> Result<()> {
        let task = Task::Chgrp {
            path: path.to_path_buf(),
            gid,
        };
        self.run_done(task, "Changing the file group failed.").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afio_module::InlineWorkerFactory;
    use afio_core::worker::Worker;

    fn mocked(max: usize) -> (Arc<InlineWorkerFactory>, ConcurrentDriver) {
        let factory = Arc::new(InlineWorkerFactory::new());
        let pool = Arc::new(WorkerPool::new(factory.clone(), max));
        (factory, ConcurrentDriver::with_pool(pool))
    }

    #[tokio::test]
    async fn path_tasks_return_their_worker() {
        let (factory, driver) = mocked(2);
        let dir = tempfile::tempdir().unwrap();

        driver.mkdir(&dir.path().join("a"), 0o755).await.unwrap();
        driver.mkdir(&dir.path().join("b"), 0o755).await.unwrap();
        assert_eq!(factory.created().len(), 1);
        assert_eq!(driver.pool().idle(), 1);
    }

    #[tokio::test]
    async fn open_failure_releases_the_worker() {
        let (factory, driver) = mocked(1);
        let dir = tempfile::tempdir().unwrap();

        let err = driver.open(&dir.path().join("missing"), "r").await.err().expect("expected open to fail");
        assert!(matches!(err, FileError::Open { .. }));
        assert_eq!(err.code(), Some(libc::ENOENT));
        assert_eq!(driver.pool().idle(), 1);
        assert!(factory.created()[0].is_running());
    }

    #[tokio::test]
    async fn open_files_pin_their_worker() {
        let (_factory, driver) = mocked(2);
        let dir = tempfile::tempdir().unwrap();

        let file = driver.open(&dir.path().join("f"), "w").await.unwrap();
        assert_eq!(driver.pool().idle(), 0);
        drop(file);
        assert_eq!(driver.pool().idle(), 1);
    }

    #[tokio::test]
    async fn invalid_mode_never_reaches_a_worker() {
        let (factory, driver) = mocked(1);
        let err = driver.open(Path::new("/tmp/x"), "z").await.err().expect("expected open to fail");
        assert!(matches!(err, FileError::InvalidArgument(_)));
        assert!(factory.created().is_empty());
    }
}
