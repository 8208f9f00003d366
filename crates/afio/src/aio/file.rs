//! `AioFile`: open file handle of the native driver.
//!
//! Owns an OS descriptor. Reads and writes are positional (`pread`/
//! `pwrite` style), so the cursor only exists on this side and `seek` is a
//! local recomputation.
//!
//! The descriptor is released once the handle is closed and no operation
//! on it is still in flight, so a late request never lands on a reused
//! descriptor number.

use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use afio_core::aio::{AioOp, AioOutput};
use afio_core::error::{FileError, Result, TaskError};
use afio_core::file::File;
use afio_core::stat::StatRecord;
use afio_core::whence::Whence;
use afio_core::{CHUNK_SIZE, DEFAULT_CREATE_MODE};
use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt};
use tracing::{trace, warn};

use super::poll::PollRegistration;
use super::{path_to_cstring, unexpected};
use crate::chain::{detached, WriteChain, CLOSED_MESSAGE};

struct FileState {
    open: bool,
    position: u64,
    size: u64,
    append: bool,
    readable: bool,
    writable: bool,
    /// Operations submitted against `fd` and not yet settled.
    inflight: usize,
    close_pending: bool,
}

impl FileState {
    /// Offset the next write lands at.
    fn write_offset(&self) -> u64 {
        if self.append {
            self.size
        } else {
            self.position
        }
    }

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
    poll: Arc<PollRegistration>,
    fd: RawFd,
    path: PathBuf,
    chain: WriteChain,
    state: Mutex<FileState>,
}

pub struct AioFile {
    shared: Arc<Shared>,
}

/// Holds the descriptor alive for one operation.
struct InFlight {
    shared: Arc<Shared>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let release = {
            let mut state = self.shared.lock();
            state.inflight -= 1;
            let release = state.inflight == 0 && state.close_pending;
            if release {
                state.close_pending = false;
            }
            release
        };
        if release {
            self.shared.release_fd();
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register one operation, or fail with `closed` if the handle is closed.
    fn begin(self: &Arc<Self>, closed: impl FnOnce() -> FileError) -> Result<InFlight> {
        let mut state = self.lock();
        if !state.open {
            return Err(closed());
        }
        state.inflight += 1;
        Ok(InFlight {
            shared: Arc::clone(self),
        })
    }

    async fn request(&self, op: AioOp) -> std::result::Result<AioOutput, TaskError> {
        self.poll.request(op).await
    }

    /// Wrap a failure and close the handle.
    fn fail(&self, context: &str, source: TaskError) -> FileError {
        self.close();
        FileError::task(context, source)
    }

    fn close(&self) {
        let release = {
            let mut state = self.lock();
            if !state.open {
                return;
            }
            state.open = false;
            state.writable = false;
            if state.inflight == 0 {
                true
            } else {
                state.close_pending = true;
                false
            }
        };
        self.chain.close();
        if release {
            self.release_fd();
        }
    }

    fn release_fd(&self) {
        let fd = self.fd;
        let path = self.path.clone();
        let submitted = self.poll.submit_detached(AioOp::Close { fd }, move |result| {
            if let Err(e) = result {
                warn!(path = %path.display(), error = %e, "closing the file failed");
            }
        });
        if let Err(e) = submitted {
            warn!(fd, error = %e, "close submission failed; closing inline");
            unsafe {
                libc::close(fd);
            }
        }
        trace!(fd, "descriptor released");
    }
}

impl AioFile {
    pub(crate) fn new(
        poll: Arc<PollRegistration>,
        fd: RawFd,
        path: PathBuf,
        size: u64,
        append: bool,
        readable: bool,
        writable: bool,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                poll,
                fd,
                path,
                chain: WriteChain::new(),
                state: Mutex::new(FileState {
                    open: true,
                    position: if append { size } else { 0 },
                    size,
                    append,
                    readable,
                    writable,
                    inflight: 0,
                    close_pending: false,
                }),
            }),
        }
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
            let written = write_at(&shared, data);
            async move {
                let outcome = written.await;
                if end {
                    shared.close();
                }
                outcome
            }
            .boxed()
        };
        self.shared.chain.push(link, timeout).await
    }

    /// Run a no-output operation that closes the handle on failure.
    async fn change(&self, op: AioOp, context: &'static str) -> Result<()> {
        let inflight = self
            .shared
            .begin(|| FileError::Closed("The file has been closed.".into()))?;
        detached(
            async move {
                let shared = Arc::clone(&inflight.shared);
                shared
                    .request(op)
                    .await
                    .map(drop)
                    .map_err(|e| shared.fail(context, e))
            },
            None,
        )
        .await
    }
}

/// Submit a positional write at the current offset and return the wait
/// for it. The cursor moves at submission, so calls made after this one
/// see the write.
fn write_at(shared: &Arc<Shared>, data: Vec<u8>) -> BoxFuture<'static, Result<usize>> {
    let inflight = match shared.begin(|| FileError::Closed(CLOSED_MESSAGE.into())) {
        Ok(inflight) => inflight,
        Err(e) => return future::ready(Err(e)).boxed(),
    };
    let len = data.len() as u64;
    let submitted = {
        let mut state = shared.lock();
        let submitted = shared.poll.submit(AioOp::Write {
            fd: shared.fd,
            data,
            offset: state.write_offset(),
        });
        if submitted.is_ok() {
            state.advance(len);
        }
        submitted
    };

    let shared = Arc::clone(shared);
    async move {
        let result = match submitted {
            Ok(submitted) => submitted.wait().await,
            Err(e) => Err(e),
        };
        let written = match result {
            Ok(AioOutput::Count(n)) => n,
            Ok(other) => {
                return Err(shared.fail("Writing to the file failed.", unexpected(&other)));
            }
            Err(e) => return Err(shared.fail("Writing to the file failed.", e)),
        };
        if written < len {
            shared.lock().fall_short(len - written);
        }
        drop(inflight);
        Ok(written as usize)
    }
    .boxed()
}

#[async_trait]
impl File for AioFile {
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
        let (offset, len) = {
            let state = self.shared.lock();
            if !state.open || !state.readable || state.position >= state.size {
                return Err(FileError::Unreadable("The file is no longer readable.".into()));
            }
            let length = if length == 0 { CHUNK_SIZE } else { length };
            let remaining = state.size - state.position;
            (state.position, (length as u64).min(remaining) as usize)
        };
        let inflight = self
            .shared
            .begin(|| FileError::Unreadable("The file is no longer readable.".into()))?;

        detached(
            async move {
                let shared = Arc::clone(&inflight.shared);
                let mut data = match shared
                    .request(AioOp::Read {
                        fd: shared.fd,
                        len,
                        offset,
                    })
                    .await
                {
                    Ok(AioOutput::Data(data)) => data,
                    Ok(other) => {
                        return Err(shared.fail("Reading from the file failed.", unexpected(&other)))
                    }
                    Err(e) => return Err(shared.fail("Reading from the file failed.", e)),
                };
                if let Some(at) = stop_byte.and_then(|b| data.iter().position(|&c| c == b)) {
                    data.truncate(at + 1);
                }
                shared.lock().position = offset + data.len() as u64;
                drop(inflight);
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

    async fn seek(&self, offset: i64, whence: Whence, _timeout: Option<Duration>) -> Result<u64> {
        let mut state = self.shared.lock();
        if !state.open {
            return Err(FileError::Unseekable("The file is no longer seekable.".into()));
        }
        let position = whence.resolve(offset, state.position, state.size)?;
        state.position = position;
        state.size = state.size.max(position);
        Ok(position)
    }

    fn tell(&self) -> u64 {
        self.shared.lock().position
    }

    fn len(&self) -> u64 {
        self.shared.lock().size
    }

    async fn truncate(&self, size: u64) -> Result<()> {
        let inflight = self
            .shared
            .begin(|| FileError::Closed("The file is no longer seekable.".into()))?;
        detached(
            async move {
                let shared = Arc::clone(&inflight.shared);
                shared
                    .request(AioOp::Ftruncate { fd: shared.fd, size })
                    .await
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
        let inflight = self
            .shared
            .begin(|| FileError::Closed("The file has been closed.".into()))?;
        detached(
            async move {
                let shared = Arc::clone(&inflight.shared);
                match shared.request(AioOp::Fstat { fd: shared.fd }).await {
                    Ok(AioOutput::Stat(stat)) => Ok(stat),
                    Ok(other) => Err(shared.fail("Stating the file failed.", unexpected(&other))),
                    Err(e) => Err(shared.fail("Stating the file failed.", e)),
                }
            },
            None,
        )
        .await
    }

    async fn copy(&self, path: &Path) -> Result<u64> {
        let target = path_to_cstring(path)?;
        let inflight = self
            .shared
            .begin(|| FileError::Closed("The file has been closed.".into()))?;
        let size = self.len();

        detached(
            async move {
                let shared = Arc::clone(&inflight.shared);
                let copy_failed = |e| FileError::task("Copying the file failed.", e);

                let out_fd = match shared
                    .request(AioOp::Open {
                        path: target,
                        flags: libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC | libc::O_CLOEXEC,
                        mode: DEFAULT_CREATE_MODE,
                    })
                    .await
                    .map_err(copy_failed)?
                {
                    AioOutput::Fd(fd) => fd,
                    other => return Err(copy_failed(unexpected(&other))),
                };

                let sent = shared
                    .request(AioOp::Sendfile {
                        out_fd,
                        in_fd: shared.fd,
                        offset: 0,
                        len: size,
                    })
                    .await;
                let closed = shared.request(AioOp::Close { fd: out_fd }).await;

                sent.map_err(copy_failed)?;
                closed.map_err(copy_failed)?;
                Ok(size)
            },
            None,
        )
        .await
    }

    async fn chown(&self, uid: u32) -> Result<()> {
        let op = AioOp::Fchown {
            fd: self.shared.fd,
            uid: Some(uid),
            gid: None,
        };
        self.change(op, "Changing the file owner failed.").await
    }

    async fn chgrp(&self, gid: u32) -> Result<()> {
        let op = AioOp::Fchown {
            fd: self.shared.fd,
            uid: None,
            gid: Some(gid),
        };
        self.change(op, "Changing the file group failed.").await
    }

    async fn chmod(&self, mode: u32) -> Result<()> {
        let op = AioOp::Fchmod {
            fd: self.shared.fd,
            mode,
        };
        self.change(op, "Changing the file mode failed.").await
    }
}

impl Drop for AioFile {
    fn drop(&mut self) {
        self.shared.close();
    }
}

