//! `FixedPool`: the blocking tier of `UringAio`.
//!
//! Spawns N OS threads at creation. Threads dequeue from a lock-free MPMC
//! queue, execute the op with blocking syscalls, push the result to an
//! unbounded result queue and bump the shared notifier. The event loop
//! drains the result queue from `UringAio::poll`.
//!
//! No dynamic scaling. Simple, predictable, safe.

use std::ffi::{CString, OsStr};
use std::fs::{self, DirBuilder, File, Permissions};
use std::io;
use std::mem::ManuallyDrop;
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, FileExt, PermissionsExt};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use afio_core::aio::{AioError, AioOp, AioOutput, AioResult};
use afio_core::error::TaskError;
use afio_core::notifier::Notifier;
use afio_core::stat::StatRecord;
use crossbeam_queue::SegQueue;
use tracing::warn;

/// Upper bound on a parked thread's sleep; covers a missed unpark.
const IDLE_PARK: Duration = Duration::from_millis(5);

/// A work item for the pool.
struct WorkItem {
    id: u64,
    op: AioOp,
}

/// A settled work item.
pub struct Completed {
    pub id: u64,
    pub result: AioResult,
}

/// Shared state between the event loop and the threads.
struct PoolInner {
    /// Work queue: event loop → threads. Unbounded so a valid request
    /// is never turned away.
    work_queue: SegQueue<WorkItem>,
    /// Result queue: threads → event loop. Unbounded so a settled request
    /// is never dropped.
    result_queue: SegQueue<Completed>,
    /// Number of threads currently executing an op.
    active: AtomicUsize,
    shutdown: AtomicBool,
    notifier: Arc<dyn Notifier>,
}

pub struct FixedPool {
    inner: Arc<PoolInner>,
    threads: Vec<Thread>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_wake: AtomicUsize,
}

impl FixedPool {
    /// Create a pool with `n` threads.
    pub fn new(n: usize, notifier: Arc<dyn Notifier>) -> Result<Self, AioError> {
        let n = n.clamp(1, 32);
        let inner = Arc::new(PoolInner {
            work_queue: SegQueue::new(),
            result_queue: SegQueue::new(),
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            notifier,
        });

        let mut threads = Vec::with_capacity(n);
        let mut handles = Vec::with_capacity(n);
        for index in 0..n {
            let thread_inner = Arc::clone(&inner);
            let spawned = thread::Builder::new()
                .name(format!("afio-blocking-{}", index))
                .spawn(move || pool_loop(thread_inner));
            match spawned {
                Ok(handle) => {
                    threads.push(handle.thread().clone());
                    handles.push(handle);
                }
                Err(e) => {
                    let pool = FixedPool {
                        inner,
                        threads,
                        handles: Mutex::new(handles),
                        next_wake: AtomicUsize::new(0),
                    };
                    pool.shutdown();
                    return Err(AioError::Spawn(e));
                }
            }
        }

        Ok(FixedPool {
            inner,
            threads,
            handles: Mutex::new(handles),
            next_wake: AtomicUsize::new(0),
        })
    }

    pub fn enqueue(&self, id: u64, op: AioOp) -> Result<(), TaskError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(TaskError::new("The blocking tier is shut down."));
        }
        self.inner.work_queue.push(WorkItem { id, op });

        let next = self.next_wake.fetch_add(1, Ordering::Relaxed);
        self.threads[next % self.threads.len()].unpark();
        Ok(())
    }

    pub fn pop_completion(&self) -> Option<Completed> {
        self.inner.result_queue.pop()
    }

    /// Items queued but not yet picked up.
    pub fn queued(&self) -> usize {
        self.inner.work_queue.len()
    }

    /// Number of threads currently executing (busy count).
    pub fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    pub fn total_workers(&self) -> usize {
        self.threads.len()
    }

    /// Stop accepting work, let the threads finish what is queued, and
    /// join them. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        for thread in &self.threads {
            thread.unpark();
        }
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("blocking tier thread panicked");
            }
        }
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Thread main loop. Drains the work queue before honouring shutdown so
/// every accepted op settles.
fn pool_loop(inner: Arc<PoolInner>) {
    loop {
        match inner.work_queue.pop() {
            Some(WorkItem { id, op }) => {
                inner.active.fetch_add(1, Ordering::Relaxed);
                let result = execute_op(op);
                inner.active.fetch_sub(1, Ordering::Relaxed);

                inner.result_queue.push(Completed { id, result });
                if let Err(e) = inner.notifier.notify() {
                    warn!(error = %e, "completion notification failed");
                }
            }
            None if inner.shutdown.load(Ordering::Acquire) => break,
            None => thread::park_timeout(IDLE_PARK),
        }
    }
}

/// Execute one op with blocking syscalls.
///
/// This runs on a pool thread. It MAY block. That's the point.
pub fn execute_op(op: AioOp) -> AioResult {
    let kind = op.kind();
    run(op).map_err(|e| TaskError::from_io(kind.failure_context(), &e))
}

/// View a raw descriptor as a `File` without taking ownership.
fn borrowed(fd: RawFd) -> ManuallyDrop<File> {
    // Safety: the descriptor stays owned by the caller; ManuallyDrop keeps
    // us from closing it.
    ManuallyDrop::new(unsafe { File::from_raw_fd(fd) })
}

fn as_path(path: &CString) -> &Path {
    Path::new(OsStr::from_bytes(path.as_bytes()))
}

fn run(op: AioOp) -> io::Result<AioOutput> {
    let output = match op {
        // ── File I/O ──
        AioOp::Read { fd, len, offset } => {
            let file = borrowed(fd);
            let mut buf = vec![0u8; len];
            let mut filled = 0;
            while filled < len {
                match file.read_at(&mut buf[filled..], offset + filled as u64) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
            buf.truncate(filled);
            AioOutput::Data(buf)
        }
        AioOp::Write { fd, data, offset } => {
            borrowed(fd).write_all_at(&data, offset)?;
            AioOutput::Count(data.len() as u64)
        }

        // ── File lifecycle ──
        AioOp::Open { path, flags, mode } => {
            let fd = unsafe { libc::open(path.as_ptr(), flags, mode as libc::c_uint) };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            AioOutput::Fd(fd)
        }
        AioOp::Close { fd } => {
            if unsafe { libc::close(fd) } < 0 {
                return Err(io::Error::last_os_error());
            }
            AioOutput::Done
        }
        AioOp::Fstat { fd } => AioOutput::Stat(StatRecord::from_metadata(&borrowed(fd).metadata()?)),
        AioOp::Ftruncate { fd, size } => {
            borrowed(fd).set_len(size)?;
            AioOutput::Done
        }
        AioOp::Fchmod { fd, mode } => {
            borrowed(fd).set_permissions(Permissions::from_mode(mode))?;
            AioOutput::Done
        }
        AioOp::Fchown { fd, uid, gid } => {
            let file = borrowed(fd);
            std::os::unix::fs::fchown(&*file, uid, gid)?;
            AioOutput::Done
        }
        AioOp::Sendfile { out_fd, in_fd, offset, len } => {
            AioOutput::Count(sendfile_all(out_fd, in_fd, offset, len)?)
        }

        // ── Path operations ──
        AioOp::Stat { path, follow } => {
            let meta = if follow {
                fs::metadata(as_path(&path))?
            } else {
                fs::symlink_metadata(as_path(&path))?
            };
            AioOutput::Stat(StatRecord::from_metadata(&meta))
        }
        AioOp::Unlink { path } => {
            fs::remove_file(as_path(&path))?;
            AioOutput::Done
        }
        AioOp::Rename { from, to } => {
            fs::rename(as_path(&from), as_path(&to))?;
            AioOutput::Done
        }
        AioOp::Link { source, target } => {
            fs::hard_link(as_path(&source), as_path(&target))?;
            AioOutput::Done
        }
        AioOp::Symlink { source, target } => {
            std::os::unix::fs::symlink(as_path(&source), as_path(&target))?;
            AioOutput::Done
        }
        AioOp::Readlink { path } => AioOutput::Path(fs::read_link(as_path(&path))?),
        AioOp::Mkdir { path, mode } => {
            DirBuilder::new().mode(mode).create(as_path(&path))?;
            AioOutput::Done
        }
        AioOp::Rmdir { path } => {
            fs::remove_dir(as_path(&path))?;
            AioOutput::Done
        }
        AioOp::Readdir { path } => {
            let names = fs::read_dir(as_path(&path))?
                .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
                .collect::<io::Result<Vec<_>>>()?;
            AioOutput::Names(names)
        }
        AioOp::Chmod { path, mode } => {
            fs::set_permissions(as_path(&path), Permissions::from_mode(mode))?;
            AioOutput::Done
        }
        AioOp::Chown { path, uid, gid } => {
            std::os::unix::fs::chown(as_path(&path), uid, gid)?;
            AioOutput::Done
        }
    };
    Ok(output)
}

/// `sendfile(2)` until `len` bytes moved or the source runs dry.
fn sendfile_all(out_fd: RawFd, in_fd: RawFd, offset: u64, len: u64) -> io::Result<u64> {
    // Linux transfers at most 0x7ffff000 bytes per call.
    const MAX_CHUNK: u64 = 0x7fff_f000;

    let mut off = offset as libc::off_t;
    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(MAX_CHUNK) as usize;
        let sent = unsafe { libc::sendfile(out_fd, in_fd, &mut off, chunk) };
        if sent < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if sent == 0 {
            break;
        }
        remaining -= sent as u64;
    }
    Ok(len - remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventfd_notifier::EventFdNotifier;
    use std::os::fd::AsRawFd;
    use std::time::Instant;

    fn cstr(path: &Path) -> CString {
        CString::new(path.as_os_str().as_bytes()).unwrap()
    }

    fn wait_for(pool: &FixedPool) -> Completed {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(done) = pool.pop_completion() {
                return done;
            }
            assert!(Instant::now() < deadline, "blocking tier never completed");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn executes_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(EventFdNotifier::create().unwrap());
        let pool = FixedPool::new(2, notifier.clone()).unwrap();

        pool.enqueue(7, AioOp::Mkdir { path: cstr(&dir.path().join("d")), mode: 0o755 })
            .unwrap();
        let done = wait_for(&pool);
        assert_eq!(done.id, 7);
        assert_eq!(done.result.unwrap(), AioOutput::Done);
        assert!(notifier.drain().unwrap() >= 1);
        assert!(dir.path().join("d").is_dir());
    }

    #[test]
    fn deep_backlog_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(EventFdNotifier::create().unwrap());
        let pool = FixedPool::new(1, notifier).unwrap();

        for id in 0..2000 {
            pool.enqueue(id, AioOp::Stat { path: cstr(dir.path()), follow: true })
                .unwrap();
        }
        for _ in 0..2000 {
            assert!(wait_for(&pool).result.is_ok());
        }
    }

    #[test]
    fn positional_io_and_sendfile() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("src");
        let dst_path = dir.path().join("dst");
        fs::write(&src_path, b"hello world").unwrap();

        let src = File::open(&src_path).unwrap();
        let dst = File::create(&dst_path).unwrap();

        let read = execute_op(AioOp::Read { fd: src.as_raw_fd(), len: 5, offset: 6 }).unwrap();
        assert_eq!(read, AioOutput::Data(b"world".to_vec()));

        let past_end = execute_op(AioOp::Read { fd: src.as_raw_fd(), len: 5, offset: 100 }).unwrap();
        assert_eq!(past_end, AioOutput::Data(Vec::new()));

        let sent = execute_op(AioOp::Sendfile {
            out_fd: dst.as_raw_fd(),
            in_fd: src.as_raw_fd(),
            offset: 0,
            len: 11,
        })
        .unwrap();
        assert_eq!(sent, AioOutput::Count(11));
        assert_eq!(fs::read(&dst_path).unwrap(), b"hello world");
    }

    #[test]
    fn failures_carry_errno() {
        let dir = tempfile::tempdir().unwrap();
        let err = execute_op(AioOp::Rmdir { path: cstr(&dir.path().join("missing")) }).unwrap_err();
        assert_eq!(err.code, Some(libc::ENOENT));
    }

    #[test]
    fn shutdown_rejects_new_work() {
        let notifier = Arc::new(EventFdNotifier::create().unwrap());
        let pool = FixedPool::new(1, notifier).unwrap();
        pool.shutdown();
        assert!(pool.enqueue(1, AioOp::Close { fd: -1 }).is_err());
    }
}
