//! `BasicIoUring`: the io_uring tier of `UringAio`.
//!
//! Uses `io_uring_enter()` for submission, reaps the CQ on demand.
//! No SQPOLL, no fixed files, no fixed buffers.
//!
//! The facility calls:
//! 1. [`build_sqe`] to translate an [`AioOp`] (staging any memory the
//!    kernel writes into in a [`Landing`])
//! 2. `push()` + `flush()` to hand it to the kernel
//! 3. `reap()` to drain CQEs, then [`complete`] to turn each one into an
//!    `AioResult`
//!
//! NEVER blocks on the submit path. io-wq workers handle blocking.

use std::ffi::CStr;
use std::io;
use std::os::fd::RawFd;

use afio_core::aio::{AioError, AioOp, AioOutput, AioResult, OpKind};
use afio_core::error::TaskError;
use afio_core::stat::StatRecord;
use io_uring::{opcode, squeue, types, IoUring, Probe};

/// Sentinel user_data for `AsyncCancel` completions.
pub const CANCEL_USER_DATA: u64 = u64::MAX;

const EMPTY_PATH: &CStr = c"";

pub struct BasicIoUringConfig {
    /// Number of SQ entries. Rounded up to a power of 2 by the kernel.
    pub sq_entries: u32,
}

impl Default for BasicIoUringConfig {
    fn default() -> Self {
        Self { sq_entries: 128 }
    }
}

/// Memory the kernel writes into while an SQE is in flight. Must stay
/// alive (and unmoved on the heap) until the CQE is reaped.
#[derive(Default)]
pub enum Landing {
    #[default]
    None,
    Buffer(Vec<u8>),
    Statx(Box<libc::statx>),
}

pub struct BasicIoUring {
    ring: IoUring,
    inflight: usize,
    pending_submit: u32,
}

impl BasicIoUring {
    pub fn new(config: BasicIoUringConfig) -> Result<Self, AioError> {
        let ring = IoUring::builder()
            .build(config.sq_entries)
            .map_err(AioError::IoUringSetup)?;

        Ok(Self {
            ring,
            inflight: 0,
            pending_submit: 0,
        })
    }

    /// Ask the kernel to bump `fd` whenever a CQE is posted.
    pub fn register_eventfd(&self, fd: RawFd) -> io::Result<()> {
        self.ring.submitter().register_eventfd(fd)
    }

    /// Probe supported opcodes via IORING_REGISTER_PROBE.
    pub fn probe_opcodes(&self) -> Vec<u8> {
        let mut probe = Probe::new();
        if self.ring.submitter().register_probe(&mut probe).is_err() {
            return Vec::new();
        }
        (0..=u8::MAX).filter(|&opc| probe.is_supported(opc)).collect()
    }

    /// Queue one SQE. Returns false when the SQ is full.
    pub fn push(&mut self, sqe: &squeue::Entry) -> bool {
        // Safety: every pointer inside `sqe` refers to memory owned by the
        // request record, which lives until the matching CQE is reaped.
        let pushed = unsafe { self.ring.submission().push(sqe).is_ok() };
        if pushed {
            self.pending_submit += 1;
        }
        pushed
    }

    /// Kick all queued submissions to the kernel.
    pub fn flush(&mut self) -> io::Result<usize> {
        if self.pending_submit == 0 {
            return Ok(0);
        }
        let submitted = self.ring.submit()?;
        self.inflight += submitted;
        self.pending_submit = self.pending_submit.saturating_sub(submitted as u32);
        Ok(submitted)
    }

    pub fn has_unsubmitted(&self) -> bool {
        self.pending_submit > 0
    }

    /// Drain every ready CQE as `(user_data, result)`.
    ///
    /// **Must not block.** If no completions are ready, appends nothing.
    pub fn reap(&mut self, out: &mut Vec<(u64, i32)>) -> usize {
        let before = out.len();
        for cqe in self.ring.completion() {
            out.push((cqe.user_data(), cqe.result()));
            self.inflight = self.inflight.saturating_sub(1);
        }
        out.len() - before
    }

    /// Best-effort cancel of an in-flight request.
    pub fn cancel(&mut self, user_data: u64) -> bool {
        let sqe = opcode::AsyncCancel::new(user_data)
            .build()
            .user_data(CANCEL_USER_DATA);
        self.push(&sqe) && self.flush().is_ok()
    }

    /// Operations submitted and not yet reaped (cancel requests included).
    pub fn inflight(&self) -> usize {
        self.inflight
    }

    /// Block until every in-flight SQE has completed, reaping into `out`.
    ///
    /// Only for teardown: after this returns the kernel no longer touches
    /// any request memory.
    pub fn wait_idle(&mut self, out: &mut Vec<(u64, i32)>) {
        let _ = self.flush();
        while self.inflight > 0 {
            if self.ring.submit_and_wait(1).is_err() {
                break;
            }
            self.reap(out);
        }
    }
}

// Note: BasicIoUring does NOT need a manual Drop impl. The inner
// `io_uring::IoUring` closes the fd and unmaps the rings; `UringAio` calls
// `wait_idle()` first so no request memory is freed under the kernel.

/// Translate an op into an SQE, or `None` if this op has no io_uring form.
///
/// The SQE is not yet stamped with user_data.
pub fn build_sqe(op: &AioOp, landing: &mut Landing) -> Option<squeue::Entry> {
    let cwd = types::Fd(libc::AT_FDCWD);

    let sqe = match op {
        // ── File I/O ──
        AioOp::Read { fd, len, offset } => {
            let len = (*len).min(u32::MAX as usize);
            let mut buf = vec![0u8; len];
            let ptr = buf.as_mut_ptr();
            *landing = Landing::Buffer(buf);
            opcode::Read::new(types::Fd(*fd), ptr, len as u32)
                .offset(*offset)
                .build()
        }
        AioOp::Write { fd, data, offset } => {
            let len = data.len().min(u32::MAX as usize) as u32;
            opcode::Write::new(types::Fd(*fd), data.as_ptr(), len)
                .offset(*offset)
                .build()
        }

        // ── File lifecycle ──
        AioOp::Open { path, flags, mode } => opcode::OpenAt::new(cwd, path.as_ptr())
            .flags(*flags)
            .mode(*mode)
            .build(),
        AioOp::Close { fd } => opcode::Close::new(types::Fd(*fd)).build(),
        AioOp::Fstat { fd } => {
            let statx = stage_statx(landing);
            opcode::Statx::new(types::Fd(*fd), EMPTY_PATH.as_ptr(), statx)
                .flags(libc::AT_EMPTY_PATH)
                .mask(libc::STATX_BASIC_STATS)
                .build()
        }
        AioOp::Stat { path, follow } => {
            let statx = stage_statx(landing);
            let flags = if *follow { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
            opcode::Statx::new(cwd, path.as_ptr(), statx)
                .flags(flags)
                .mask(libc::STATX_BASIC_STATS)
                .build()
        }

        // ── Metadata ──
        AioOp::Unlink { path } => opcode::UnlinkAt::new(cwd, path.as_ptr()).build(),
        AioOp::Rmdir { path } => opcode::UnlinkAt::new(cwd, path.as_ptr())
            .flags(libc::AT_REMOVEDIR)
            .build(),
        AioOp::Rename { from, to } => {
            opcode::RenameAt::new(cwd, from.as_ptr(), cwd, to.as_ptr()).build()
        }
        AioOp::Mkdir { path, mode } => opcode::MkDirAt::new(cwd, path.as_ptr())
            .mode(*mode)
            .build(),
        // symlinkat(target, newdirfd, linkpath): the link lives at `target`
        // and points to `source`.
        AioOp::Symlink { source, target } => {
            opcode::SymlinkAt::new(cwd, source.as_ptr(), target.as_ptr()).build()
        }
        AioOp::Link { source, target } => {
            opcode::LinkAt::new(cwd, source.as_ptr(), cwd, target.as_ptr()).build()
        }

        // No opcode: ftruncate, fchmod, fchown, sendfile, readlink,
        // readdir, chmod, chown go to the blocking tier.
        _ => return None,
    };
    Some(sqe)
}

fn stage_statx(landing: &mut Landing) -> *mut types::statx {
    // Safety: statx is plain old data; all-zero is a valid value.
    let mut buf: Box<libc::statx> = Box::new(unsafe { std::mem::zeroed() });
    let ptr = buf.as_mut() as *mut libc::statx as *mut types::statx;
    *landing = Landing::Statx(buf);
    ptr
}

/// Turn a CQE result into an `AioResult`, consuming the staged memory.
pub fn complete(kind: OpKind, result: i32, landing: Landing) -> AioResult {
    if result < 0 {
        return Err(TaskError::from_errno(kind.failure_context(), -result));
    }
    match (kind, landing) {
        (OpKind::Open, _) => Ok(AioOutput::Fd(result)),
        (OpKind::Read, Landing::Buffer(mut buf)) => {
            buf.truncate(result as usize);
            Ok(AioOutput::Data(buf))
        }
        (OpKind::Write, _) => Ok(AioOutput::Count(result as u64)),
        (OpKind::Fstat | OpKind::Stat, Landing::Statx(stx)) => {
            Ok(AioOutput::Stat(stat_from_statx(&stx)))
        }
        (OpKind::Read | OpKind::Fstat | OpKind::Stat, _) => Err(TaskError::new(format!(
            "{} Completion lost its buffer.",
            kind.failure_context()
        ))),
        _ => Ok(AioOutput::Done),
    }
}

fn makedev(major: u32, minor: u32) -> u64 {
    let (major, minor) = (u64::from(major), u64::from(minor));
    ((major & 0xffff_f000) << 32)
        | ((major & 0x0000_0fff) << 8)
        | ((minor & 0xffff_ff00) << 12)
        | (minor & 0x0000_00ff)
}

pub fn stat_from_statx(stx: &libc::statx) -> StatRecord {
    StatRecord::from_values([
        makedev(stx.stx_dev_major, stx.stx_dev_minor) as i64,
        stx.stx_ino as i64,
        i64::from(stx.stx_mode),
        i64::from(stx.stx_nlink),
        i64::from(stx.stx_uid),
        i64::from(stx.stx_gid),
        makedev(stx.stx_rdev_major, stx.stx_rdev_minor) as i64,
        stx.stx_size as i64,
        stx.stx_atime.tv_sec,
        stx.stx_mtime.tv_sec,
        stx.stx_ctime.tv_sec,
        i64::from(stx.stx_blksize),
        stx.stx_blocks as i64,
    ])
}
