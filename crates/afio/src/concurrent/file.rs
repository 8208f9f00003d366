//! `ConcurrentFile`: open file handle of the worker-pool driver.
//!
//! The descriptor lives in one worker's handle table; this side keeps the
//! cursor, the known size and the mode flags, and pins the worker for as
//! long as the handle exists. Tasks for one worker run in enqueue order,
//! so the worker-side cursor follows the calls made here.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use afio_core::error::{FileError, Result, TaskError};
use afio_core::file::File;
use afio_core::stat::StatRecord;
use afio_core::task::{HandleId, Task, TaskOutput};
use afio_core::whence::Whence;
use afio_core::CHUNK_SIZE;
use afio_module::PooledWorker;
use async_trait::async_trait;
use futures::future::FutureExt;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::chain::{detached, WriteChain};

struct FileState {
    open: bool,
    position: u64,
    size: u64,
    append: bool,
    readable: bool,
    writable: bool,
}

impl FileState {
    /// Account for `len` bytes handed to a write.
    fn advance(&mut self, len: u64) {
        if self.append {
            self.size += len;
        } else {
            self.position += len;
            self.size = self.size.max(self.position);
        }
    }

    /// Take back the part of an advance a short write did not cover.
    fn fall_short(&mut self, missing: u64) {
        if self.append {
            self.size = self.size.saturating_sub(missing);
        } else {
            self.position = self.position.saturating_sub(missing);
        }
    }
}

struct Shared {
    worker: PooledWorker,
    handle: HandleId,
    path: PathBuf,
    chain: WriteChain,
    state: Mutex<FileState>,
}

pub struct ConcurrentFile {
    shared: Arc<Shared>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self, closed: impl FnOnce() -> FileError) -> Result<()> {
        if self.lock().open {
            Ok(())
        } else {
            Err(closed())
        }
    }

    /// Wrap a failure and close the handle.
    fn fail(&self, context: &str, source: TaskError) -> FileError {
        self.close();
        FileError::task(context, source)
    }

    fn close(&self) {
        {
            let mut state = self.lock();
            if !state.open {
                return;
            }
            state.open = false;
            state.writable = false;
        }
        self.chain.close();

        if !self.worker.is_running() {
            return;
        }
        let mut closing = self.worker.enqueue(Task::Close {
            handle: self.handle,
        });
        let worker = self.worker.worker();
        let path = self.path.clone();
        let on_failure = move |e: TaskError| {
            if !worker.is_running() {
                debug!(worker = worker.id(), error = %e, "close not delivered; worker already stopped");
                return;
            }
            // The worker's handle table is in an unknown state now.
            warn!(path = %path.display(), worker = worker.id(), error = %e, "close failed; killing worker");
            worker.kill();
        };

        match (&mut closing).now_or_never() {
            Some(Ok(_)) => {}
            Some(Err(e)) => on_failure(e),
            None => match Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        if let Err(e) = closing.await {
                            on_failure(e);
                        }
                    });
                }
                // The task still runs; only its outcome goes unobserved.
                Err(_) => debug!("file closed outside a runtime"),
            },
        }
    }
}

impl ConcurrentFile {
    pub(crate) fn new(
        worker: PooledWorker,
        handle: HandleId,
        path: PathBuf,
        size: u64,
        append: bool,
        readable: bool,
        writable: bool,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                worker,
                handle,
                path,
                chain: WriteChain::new(),
                state: Mutex::new(FileState {
                    open: true,
                    position: if append { size } else { 0 },
                    size,
                    append,
                    readable,
                    writable,
                }),
            }),
        }
    }

    /// Id of the worker holding this file.
    pub fn worker_id(&self) -> usize {
        self.shared.worker.id()
    }

    async fn send(&self, data: Vec<u8>, timeout: Option<Duration>, end: bool) -> Result<usize> {
        {
            let mut state = self.shared.lock();
            if !state.writable {
                return Err(FileError::Unwritable("The file is no longer writable.".into()));
            }
            if end {
                state.writable = false;
            }
        }

        let shared = Arc::clone(&self.shared);
        let link = move || {
            // Enqueued and accounted for before the chain yields, so calls
            // made after this one queue behind it on the worker.
            let len = data.len() as u64;
            let pending = shared.worker.enqueue(Task::Write {
                handle: shared.handle,
                data,
            });
            shared.lock().advance(len);
            async move {
                let outcome = pending
                    .await
                    .and_then(TaskOutput::into_written)
                    .map_err(|e| shared.fail("Writing to the file failed.", e));

                if let Ok(written) = outcome {
                    if (written as u64) < len {
                        shared.lock().fall_short(len - written as u64);
                    }
                }
                if end {
                    shared.close();
                }
                outcome
            }
            .boxed()
        };
        self.shared.chain.push(link, timeout).await
    }

    /// Run a path task for this file; a failure closes the handle.
    async fn change(&self, task: Task, context: &'static str) -> Result<()> {
        self.shared
            .ensure_open(|| FileError::Closed("The file has been closed.".into()))?;
        let shared = Arc::clone(&self.shared);
        let pending = shared.worker.enqueue(task);
        detached(
            async move {
                pending
                    .await
                    .and_then(TaskOutput::into_done)
                    .map_err(|e| shared.fail(context, e))
            },
            None,
        )
        .await
    }
}

#[async_trait]
impl File for ConcurrentFile {
    fn path(&self) -> &Path {
        &self.shared.path
    }

    fn is_open(&self) -> bool {
        self.shared.lock().open
    }

    fn close(&self) {
        self.shared.close();
    }

    fn eof(&self) -> bool {
        let state = self.shared.lock();
        state.position >= state.size
    }

    async fn read(
        &self,
        length: usize,
        stop_byte: Option<u8>,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        if !self.is_readable() {
            return Err(FileError::Unreadable("The file is no longer readable.".into()));
        }
        let length = if length == 0 { CHUNK_SIZE } else { length };
        let shared = Arc::clone(&self.shared);
        let pending = shared.worker.enqueue(Task::Read {
            handle: shared.handle,
            length,
        });

        detached(
            async move {
                let mut data = pending
                    .await
                    .and_then(TaskOutput::into_data)
                    .map_err(|e| shared.fail("Reading from the file failed.", e))?;

                match stop_byte.and_then(|b| data.iter().position(|&c| c == b)) {
                    Some(at) => {
                        // Give back what was read past the stop byte.
                        data.truncate(at + 1);
                        let target = shared.lock().position + data.len() as u64;
                        let position = shared
                            .worker
                            .enqueue(Task::Seek {
                                handle: shared.handle,
                                offset: target,
                            })
                            .await
                            .and_then(TaskOutput::into_position)
                            .map_err(|e| shared.fail("Seeking in the file failed.", e))?;
                        shared.lock().position = position;
                    }
                    None => shared.lock().position += data.len() as u64,
                }
                Ok(data)
            },
            timeout,
        )
        .await
    }

    fn is_readable(&self) -> bool {
        let state = self.shared.lock();
        state.open && state.readable && state.position < state.size
    }

    async fn write(&self, data: Vec<u8>, timeout: Option<Duration>) -> Result<usize> {
        self.send(data, timeout, false).await
    }

    async fn end(&self, data: Vec<u8>, timeout: Option<Duration>) -> Result<usize> {
        self.send(data, timeout, true).await
    }

    fn is_writable(&self) -> bool {
        self.shared.lock().writable
    }

    async fn seek(&self, offset: i64, whence: Whence, timeout: Option<Duration>) -> Result<u64> {
        let target = {
            let mut state = self.shared.lock();
            if !state.open {
                return Err(FileError::Unseekable("The file is no longer seekable.".into()));
            }
            let target = whence.resolve(offset, state.position, state.size)?;
            state.position = target;
            state.size = state.size.max(target);
            target
        };

        let shared = Arc::clone(&self.shared);
        let pending = shared.worker.enqueue(Task::Seek {
            handle: shared.handle,
            offset: target,
        });
        detached(
            async move {
                let position = pending
                    .await
                    .and_then(TaskOutput::into_position)
                    .map_err(|e| shared.fail("Seeking in the file failed.", e))?;
                let mut state = shared.lock();
                state.position = position;
                state.size = state.size.max(position);
                Ok(position)
            },
            timeout,
        )
        .await
    }

    fn tell(&self) -> u64 {
        self.shared.lock().position
    }

    fn len(&self) -> u64 {
        self.shared.lock().size
    }

    async fn truncate(&self, size: u64) -> Result<()> {
        self.shared
            .ensure_open(|| FileError::Closed("The file is no longer seekable.".into()))?;
        let shared = Arc::clone(&self.shared);
        let pending = shared.worker.enqueue(Task::Ftruncate {
            handle: shared.handle,
            size,
        });
        detached(
            async move {
                pending
                    .await
                    .and_then(TaskOutput::into_done)
                    .map_err(|e| shared.fail("Truncating the file failed.", e))?;
                let mut state = shared.lock();
                state.size = size;
                state.position = state.position.min(size);
                Ok(())
            },
            None,
        )
        .await
    }

    async fn stat(&self) -> Result<StatRecord> {
        self.shared
            .ensure_open(|| FileError::Closed("The file has been closed.".into()))?;
        let shared = Arc::clone(&self.shared);
        let pending = shared.worker.enqueue(Task::Fstat {
            handle: shared.handle,
        });
        detached(
            async move {
                pending
                    .await
                    .and_then(TaskOutput::into_stat)
                    .map_err(|e| shared.fail("Stating the file failed.", e))
            },
            None,
        )
        .await
    }

    async fn copy(&self, path: &Path) -> Result<u64> {
        self.shared
            .ensure_open(|| FileError::Closed("The file has been closed.".into()))?;
        self.shared
            .worker
            .enqueue(Task::Copy {
                from: self.shared.path.clone(),
                to: path.to_path_buf(),
            })
            .await
            .and_then(TaskOutput::into_copied)
            .map_err(|e| FileError::task("Copying the file failed.", e))
    }

    async fn chown(&self, uid: u32) -> Result<()> {
        let task = Task::Chown {
            path: self.shared.path.clone(),
            uid,
        };
        self.change(task, "Changing the file owner failed.").await
    }

    async fn chgrp(&self, gid: u32) -> Result<()> {
        let task = Task::Chgrp {
            path: self.shared.path.clone(),
            gid,
        };
        self.change(task, "Changing the file group failed.").await
    }

    async fn chmod(&self, mode: u32) -> Result<()> {
        let task = Task::Chmod {
            path: self.shared.path.clone(),
            mode,
        };
        self.change(task, "Changing the file mode failed.").await
    }
}

impl Drop for ConcurrentFile {
    fn drop(&mut self) {
        self.shared.close();
    }
}
