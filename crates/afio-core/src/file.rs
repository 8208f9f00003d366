//! Open file handle contract.
//!
//! A `File` tracks one open file's cursor, known size and mode flags on
//! the caller side. Both backends give the same guarantees:
//!
//! - Writes on one handle complete in issue order, even when several are
//!   pending at once.
//! - `position == len()` means end-of-file; seeking past the end is legal
//!   and defines the new size.
//! - Once closed, every operation fails and queued writes are rejected.
//!   `close()` is idempotent, and dropping the handle closes it.
//!
//! A `timeout` releases the caller with `FileError::Timeout`; the backend
//! request it was waiting on still settles.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::stat::StatRecord;
use crate::whence::Whence;

#[async_trait]
pub trait File: Send + Sync {
    fn path(&self) -> &Path;

    fn is_open(&self) -> bool;

    /// Close the handle. Pending writes are rejected with "The file was closed.".
    fn close(&self);

    fn eof(&self) -> bool;

    /// Read up to `length` bytes (`0` means `CHUNK_SIZE`).
    ///
    /// With `stop_byte`, the result ends just after its first occurrence
    /// and the cursor is left right after it.
    async fn read(
        &self,
        length: usize,
        stop_byte: Option<u8>,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>>;

    fn is_readable(&self) -> bool;

    /// Queue a write behind every pending one; returns bytes written.
    async fn write(&self, data: Vec<u8>, timeout: Option<Duration>) -> Result<usize>;

    /// Like `write`, then close once it settles. The handle stops accepting
    /// writes immediately.
    async fn end(&self, data: Vec<u8>, timeout: Option<Duration>) -> Result<usize>;

    fn is_writable(&self) -> bool;

    /// Move the cursor; returns the new position.
    async fn seek(&self, offset: i64, whence: Whence, timeout: Option<Duration>) -> Result<u64>;

    fn tell(&self) -> u64;

    /// Known size of the file.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn truncate(&self, size: u64) -> Result<()>;

    async fn stat(&self) -> Result<StatRecord>;

    /// Copy the file's contents to `path`; returns bytes copied.
    async fn copy(&self, path: &Path) -> Result<u64>;

    async fn chown(&self, uid: u32) -> Result<()>;

    async fn chgrp(&self, gid: u32) -> Result<()>;

    async fn chmod(&self, mode: u32) -> Result<()>;
}
