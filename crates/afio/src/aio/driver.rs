//! `AioDriver`: the native driver.
//!
//! Every call becomes one (or a few) native submissions awaited through
//! the shared [`PollRegistration`]. Nothing blocks the event loop: io_uring
//! serves what it can, the facility's blocking tier serves the rest.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use afio_core::aio::{AioBackend, AioOp, AioOutput};
use afio_core::config::AfioConfig;
use afio_core::driver::Driver;
use afio_core::error::{FileError, Result, TaskError};
use afio_core::file::File;
use afio_core::mode::OpenMode;
use afio_core::sort::sort_natural;
use afio_core::stat::StatRecord;
use afio_core::DEFAULT_CREATE_MODE;
use afio_module::UringAio;
use async_trait::async_trait;
use tracing::{debug, warn};

use super::file::AioFile;
use super::poll::PollRegistration;
use super::{path_to_cstring, unexpected};
use crate::chain::detached;

pub struct AioDriver {
    poll: Arc<PollRegistration>,
}

impl AioDriver {
    /// Driver over a fresh [`UringAio`] facility.
    pub fn new(config: &AfioConfig) -> Result<Self> {
        let backend = UringAio::new(config).map_err(|e| FileError::Operation {
            message: format!("Could not start the native I/O facility: {}", e),
            code: None,
        })?;
        debug!(uring = backend.uses_uring(), "native driver ready");
        Ok(Self::with_backend(Arc::new(backend)))
    }

    pub fn with_backend(backend: Arc<dyn AioBackend>) -> Self {
        Self {
            poll: PollRegistration::new(backend),
        }
    }

    pub fn poll(&self) -> &Arc<PollRegistration> {
        &self.poll
    }

    async fn run(&self, op: AioOp, context: &'static str) -> Result<AioOutput> {
        self.poll
            .request(op)
            .await
            .map_err(|e| FileError::task(context, e))
    }

    async fn run_done(&self, op: AioOp, context: &'static str) -> Result<()> {
        match self.run(op, context).await? {
            AioOutput::Done => Ok(()),
            other => Err(FileError::task(context, unexpected(&other))),
        }
    }
}

#[async_trait]
impl Driver for AioDriver {
    async fn open(&self, path: &Path, mode: &str) -> Result<Box<dyn File>> {
        let mode = OpenMode::parse(mode)?;
        let native_path = path_to_cstring(path)?;
        let poll = Arc::clone(&self.poll);
        let path = path.to_path_buf();

        let file = detached(
            async move {
                let fd = match poll
                    .request(AioOp::Open {
                        path: native_path,
                        flags: mode.flags().bits(),
                        mode: DEFAULT_CREATE_MODE,
                    })
                    .await
                {
                    Ok(AioOutput::Fd(fd)) => fd,
                    Ok(other) => return Err(FileError::open("Opening the file failed.", unexpected(&other))),
                    Err(e) => return Err(FileError::open("Opening the file failed.", e)),
                };

                // Truncating modes start empty; no need to ask.
                let size = if mode.truncate() {
                    0
                } else {
                    let stat = match poll.request(AioOp::Fstat { fd }).await {
                        Ok(AioOutput::Stat(stat)) => Ok(stat.size()),
                        Ok(other) => Err(unexpected(&other)),
                        Err(e) => Err(e),
                    };
                    match stat {
                        Ok(size) => size,
                        Err(e) => {
                            let closing = poll.submit_detached(AioOp::Close { fd }, |_| {});
                            if closing.is_err() {
                                unsafe {
                                    libc::close(fd);
                                }
                            }
                            return Err(FileError::open("Finding the file size failed.", e));
                        }
                    }
                };

                Ok(AioFile::new(
                    poll,
                    fd,
                    path,
                    size,
                    mode.append(),
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
        let native_path = path_to_cstring(path)?;
        let context = "Unlinking the file failed.";

        // lstat first so a missing path and a directory fail distinctly.
        let stat = self
            .poll
            .request(AioOp::Stat {
                path: native_path.clone(),
                follow: false,
            })
            .await
            .map_err(|e| {
                let code = e.code.unwrap_or(libc::ENOENT);
                FileError::task(
                    context,
                    TaskError::from_errno("Could not unlink file. File does not exist.", code),
                )
            })?;
        if let AioOutput::Stat(stat) = stat {
            if stat.is_dir() {
                return Err(FileError::task(
                    context,
                    TaskError::from_errno("Could not unlink file. Path is a directory.", libc::EISDIR),
                ));
            }
        }

        self.run_done(AioOp::Unlink { path: native_path }, context).await
    }

    async fn stat(&self, path: &Path) -> Result<StatRecord> {
        let context = "Stating the file failed.";
        let op = AioOp::Stat {
            path: path_to_cstring(path)?,
            follow: true,
        };
        match self.run(op, context).await? {
            AioOutput::Stat(stat) => Ok(stat),
            other => Err(FileError::task(context, unexpected(&other))),
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let op = AioOp::Rename {
            from: path_to_cstring(from)?,
            to: path_to_cstring(to)?,
        };
        self.run_done(op, "Renaming the file failed.").await
    }

    async fn link(&self, source: &Path, target: &Path) -> Result<()> {
        let op = AioOp::Link {
            source: path_to_cstring(source)?,
            target: path_to_cstring(target)?,
        };
        self.run_done(op, "Creating the link failed.").await
    }

    async fn symlink(&self, source: &Path, target: &Path) -> Result<()> {
        let op = AioOp::Symlink {
            source: path_to_cstring(source)?,
            target: path_to_cstring(target)?,
        };
        self.run_done(op, "Creating the symlink failed.").await
    }

    async fn readlink(&self, path: &Path) -> Result<PathBuf> {
        let context = "Reading the symlink failed.";
        let op = AioOp::Readlink {
            path: path_to_cstring(path)?,
        };
        match self.run(op, context).await? {
            AioOutput::Path(target) => Ok(target),
            other => Err(FileError::task(context, unexpected(&other))),
        }
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<u64> {
        let file = self.open(from, "r").await?;
        let copied = file.copy(to).await;
        file.close();
        copied
    }

    async fn is_file(&self, path: &Path) -> Result<bool> {
        Ok(self.stat(path).await.map(|s| s.is_file()).unwrap_or(false))
    }

    async fn is_dir(&self, path: &Path) -> Result<bool> {
        Ok(self.stat(path).await.map(|s| s.is_dir()).unwrap_or(false))
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        let op = AioOp::Mkdir {
            path: path_to_cstring(path)?,
            mode,
        };
        self.run_done(op, "Creating the directory failed.").await
    }

    async fn lsdir(&self, path: &Path) -> Result<Vec<String>> {
        let context = "Reading the directory failed.";
        let op = AioOp::Readdir {
            path: path_to_cstring(path)?,
        };
        match self.run(op, context).await? {
            AioOutput::Names(mut names) => {
                sort_natural(&mut names);
                Ok(names)
            }
            other => Err(FileError::task(context, unexpected(&other))),
        }
    }

    async fn rmdir(&self, path: &Path) -> Result<()> {
        let op = AioOp::Rmdir {
            path: path_to_cstring(path)?,
        };
        self.run_done(op, "Removing the directory failed.").await
    }

    async fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        let op = AioOp::Chmod {
            path: path_to_cstring(path)?,
            mode,
        };
        self.run_done(op, "Changing the file mode failed.").await
    }

    async fn chown(&self, path: &Path, uid: u32) -> Result<()> {
        let op = AioOp::Chown {
            path: path_to_cstring(path)?,
            uid: Some(uid),
            gid: None,
        };
        self.run_done(op, "Changing the file owner failed.").await
    }

    async fn chgrp(&self, path: &Path, gid: u32) -> Result<()> {
        let op = AioOp::Chown {
            path: path_to_cstring(path)?,
            uid: None,
            gid: Some(gid),
        };
        self.run_done(op, "Changing the file group failed.").await
    }
}

impl Drop for AioDriver {
    fn drop(&mut self) {
        let inflight = self.poll.requests();
        if inflight > 0 {
            warn!(inflight, "native driver dropped with requests in flight");
        }
    }
}
