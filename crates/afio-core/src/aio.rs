//! Native completion facility abstraction (native backend).
//!
//! An `AioBackend` accepts operations with a completion callback and
//! signals one eventfd whenever callbacks are ready to run. The event loop
//! watches that eventfd and calls [`AioBackend::poll`] to run them.
//!
//! ```text
//!   submit(op, cb) ──► io_uring SQ ─────► CQ ───┐
//!                 └──► blocking tier ──► queue ─┴──► eventfd ──► poll() ──► cb(result)
//! ```
//!
//! # Implementors
//!
//! - `UringAio` (default): io_uring for every op whose opcode the kernel
//!   supports, a fixed thread pool for the rest (ftruncate, fchmod,
//!   sendfile, readdir, ...). Falls back to the thread pool for everything
//!   when io_uring cannot be set up.

use std::ffi::CString;
use std::io;
use std::os::fd::RawFd;
use std::path::PathBuf;

use thiserror::Error;

use crate::error::TaskError;
use crate::stat::StatRecord;

/// Id of one submitted request; used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// One native operation. Owns every buffer and path it needs until the
/// request settles.
#[derive(Debug)]
pub enum AioOp {
    Open { path: CString, flags: i32, mode: u32 },
    Close { fd: RawFd },
    Read { fd: RawFd, len: usize, offset: u64 },
    Write { fd: RawFd, data: Vec<u8>, offset: u64 },
    Fstat { fd: RawFd },
    Ftruncate { fd: RawFd, size: u64 },
    Fchmod { fd: RawFd, mode: u32 },
    Fchown { fd: RawFd, uid: Option<u32>, gid: Option<u32> },
    /// Copy `len` bytes of `in_fd` starting at `offset` into `out_fd`.
    Sendfile { out_fd: RawFd, in_fd: RawFd, offset: u64, len: u64 },
    Stat { path: CString, follow: bool },
    Unlink { path: CString },
    Rename { from: CString, to: CString },
    Link { source: CString, target: CString },
    Symlink { source: CString, target: CString },
    Readlink { path: CString },
    Mkdir { path: CString, mode: u32 },
    Rmdir { path: CString },
    Readdir { path: CString },
    Chmod { path: CString, mode: u32 },
    Chown { path: CString, uid: Option<u32>, gid: Option<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Open,
    Close,
    Read,
    Write,
    Fstat,
    Ftruncate,
    Fchmod,
    Fchown,
    Sendfile,
    Stat,
    Unlink,
    Rename,
    Link,
    Symlink,
    Readlink,
    Mkdir,
    Rmdir,
    Readdir,
    Chmod,
    Chown,
}

impl OpKind {
    pub const COUNT: usize = 20;

    pub const ALL: [OpKind; Self::COUNT] = [
        Self::Open,
        Self::Close,
        Self::Read,
        Self::Write,
        Self::Fstat,
        Self::Ftruncate,
        Self::Fchmod,
        Self::Fchown,
        Self::Sendfile,
        Self::Stat,
        Self::Unlink,
        Self::Rename,
        Self::Link,
        Self::Symlink,
        Self::Readlink,
        Self::Mkdir,
        Self::Rmdir,
        Self::Readdir,
        Self::Chmod,
        Self::Chown,
    ];

    /// Context prefix for failures of this kind.
    pub fn failure_context(self) -> &'static str {
        match self {
            Self::Open => "Could not open the file.",
            Self::Close => "Could not close the file.",
            Self::Read => "Could not read from the file.",
            Self::Write => "Could not write to the file.",
            Self::Fstat | Self::Stat => "Could not stat the file.",
            Self::Ftruncate => "Could not truncate the file.",
            Self::Fchmod | Self::Chmod => "Could not change the file mode.",
            Self::Fchown | Self::Chown => "Could not change the file owner.",
            Self::Sendfile => "Could not copy the file.",
            Self::Unlink => "Could not unlink the file.",
            Self::Rename => "Could not rename the file.",
            Self::Link => "Could not create the link.",
            Self::Symlink => "Could not create the symlink.",
            Self::Readlink => "Could not read the link.",
            Self::Mkdir => "Could not create the directory.",
            Self::Rmdir => "Could not remove the directory.",
            Self::Readdir => "Could not read the directory.",
        }
    }
}

impl AioOp {
    pub fn kind(&self) -> OpKind {
        match self {
            Self::Open { .. } => OpKind::Open,
            Self::Close { .. } => OpKind::Close,
            Self::Read { .. } => OpKind::Read,
            Self::Write { .. } => OpKind::Write,
            Self::Fstat { .. } => OpKind::Fstat,
            Self::Ftruncate { .. } => OpKind::Ftruncate,
            Self::Fchmod { .. } => OpKind::Fchmod,
            Self::Fchown { .. } => OpKind::Fchown,
            Self::Sendfile { .. } => OpKind::Sendfile,
            Self::Stat { .. } => OpKind::Stat,
            Self::Unlink { .. } => OpKind::Unlink,
            Self::Rename { .. } => OpKind::Rename,
            Self::Link { .. } => OpKind::Link,
            Self::Symlink { .. } => OpKind::Symlink,
            Self::Readlink { .. } => OpKind::Readlink,
            Self::Mkdir { .. } => OpKind::Mkdir,
            Self::Rmdir { .. } => OpKind::Rmdir,
            Self::Readdir { .. } => OpKind::Readdir,
            Self::Chmod { .. } => OpKind::Chmod,
            Self::Chown { .. } => OpKind::Chown,
        }
    }
}

/// Successful result of an [`AioOp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AioOutput {
    /// New descriptor (`Open`).
    Fd(RawFd),
    /// Bytes read (`Read`); shorter than requested at end-of-file.
    Data(Vec<u8>),
    /// Bytes written or transferred (`Write`, `Sendfile`).
    Count(u64),
    Stat(StatRecord),
    Path(PathBuf),
    Names(Vec<String>),
    Done,
}

pub type AioResult = Result<AioOutput, TaskError>;

/// Runs exactly once, on the thread that calls [`AioBackend::poll`].
pub type AioCallback = Box<dyn FnOnce(AioResult) + Send>;

/// Callback-completion I/O facility.
///
/// **Contract:**
/// - `submit()` must NEVER block. The callback is never invoked from
///   inside `submit()`; it runs from a later `poll()`.
/// - Every accepted request eventually settles, even if it was cancelled
///   (its callback is then dropped without being called).
/// - Each settled request bumps the eventfd returned by `event_fd()`.
pub trait AioBackend: Send + Sync {
    fn submit(&self, op: AioOp, callback: AioCallback) -> Result<RequestId, TaskError>;

    /// Best-effort cancel. Returns true if the callback was discarded.
    fn cancel(&self, id: RequestId) -> bool;

    /// Non-blocking eventfd to watch for readability.
    fn event_fd(&self) -> RawFd;

    /// Reset the eventfd counter; `WouldBlock` when nothing was signalled.
    fn drain_notifications(&self) -> io::Result<u64>;

    /// Run the callbacks of every settled request. Returns how many ran.
    ///
    /// **Must not block.**
    fn poll(&self) -> usize;

    /// Requests submitted but not yet delivered.
    fn nreqs(&self) -> usize;
}

/// Native facility setup failures.
#[derive(Debug, Error)]
pub enum AioError {
    #[error("eventfd creation failed: {0}")]
    EventFd(#[source] io::Error),

    #[error("io_uring setup failed: {0}")]
    IoUringSetup(#[source] io::Error),

    #[error("blocking tier thread spawn failed: {0}")]
    Spawn(#[source] io::Error),
}
