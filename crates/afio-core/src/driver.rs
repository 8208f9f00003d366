//! Filesystem driver contract.
//!
//! A `Driver` exposes filesystem operations as futures. Callers hold one
//! driver value (usually `Arc<dyn Driver>`) and never see which backend
//! executes the work.
//!
//! # Implementors
//!
//! - `ConcurrentDriver` (afio): serializes each call into a `Task` and runs
//!   it on a pooled worker thread.
//!
//! - `AioDriver` (afio): submits each call to the native completion
//!   facility (io_uring, with a blocking tier for operations io_uring
//!   lacks) and awaits its callback.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::file::File;
use crate::stat::StatRecord;

#[async_trait]
pub trait Driver: Send + Sync {
    /// Open `path` with one of `r, r+, w, w+, a, a+, x, x+, c, c+`.
    ///
    /// An invalid mode fails with `InvalidArgument` before any I/O.
    async fn open(&self, path: &Path, mode: &str) -> Result<Box<dyn File>>;

    /// Remove a file. Missing paths and directories fail distinguishably
    /// (see `FileError::code`).
    async fn unlink(&self, path: &Path) -> Result<()>;

    async fn stat(&self, path: &Path) -> Result<StatRecord>;

    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Create a hard link at `target` referring to `source`.
    async fn link(&self, source: &Path, target: &Path) -> Result<()>;

    /// Create a symbolic link at `target` pointing to `source`.
    async fn symlink(&self, source: &Path, target: &Path) -> Result<()>;

    async fn readlink(&self, path: &Path) -> Result<PathBuf>;

    /// Copy `from` to `to`; returns the number of bytes copied.
    async fn copy(&self, from: &Path, to: &Path) -> Result<u64>;

    async fn is_file(&self, path: &Path) -> Result<bool>;

    async fn is_dir(&self, path: &Path) -> Result<bool>;

    async fn mkdir(&self, path: &Path, mode: u32) -> Result<()>;

    /// Entry names without `.`/`..`, in natural case-insensitive order.
    async fn lsdir(&self, path: &Path) -> Result<Vec<String>>;

    async fn readdir(&self, path: &Path) -> Result<Vec<String>> {
        self.lsdir(path).await
    }

    async fn rmdir(&self, path: &Path) -> Result<()>;

    async fn chmod(&self, path: &Path, mode: u32) -> Result<()>;

    async fn chown(&self, path: &Path, uid: u32) -> Result<()>;

    async fn chgrp(&self, path: &Path, gid: u32) -> Result<()>;
}
