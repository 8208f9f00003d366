//! Shared fixtures for the driver contract suites.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use afio::{AfioConfig, AioDriver, ConcurrentDriver, Driver};
use afio_module::{InlineWorkerFactory, WorkerPool};
use tempfile::TempDir;

pub const WRITE_STRING: &[u8] = b"abcdefghijklmnopqrstuvwxz";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Worker-pool driver on real worker threads.
pub fn concurrent() -> Arc<dyn Driver> {
    init_tracing();
    Arc::new(ConcurrentDriver::new(&AfioConfig::new().max_workers(2)))
}

/// Worker-pool driver whose workers run tasks inline.
pub fn mocked() -> Arc<dyn Driver> {
    init_tracing();
    Arc::new(mocked_driver(Arc::new(InlineWorkerFactory::new())))
}

pub fn mocked_driver(factory: Arc<InlineWorkerFactory>) -> ConcurrentDriver {
    ConcurrentDriver::with_pool(Arc::new(WorkerPool::new(factory, 2)))
}

/// Native driver; io_uring where the kernel allows it.
pub fn native() -> Arc<dyn Driver> {
    init_tracing();
    Arc::new(native_driver(false))
}

/// Native driver forced onto its blocking tier.
pub fn native_blocking() -> Arc<dyn Driver> {
    init_tracing();
    Arc::new(native_driver(true))
}

pub fn native_driver(disable_uring: bool) -> AioDriver {
    let config = AfioConfig::new()
        .blocking_threads(2)
        .disable_uring(disable_uring);
    AioDriver::new(&config).expect("native driver")
}

pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Create `name` holding [`WRITE_STRING`].
    pub fn seeded(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, WRITE_STRING).expect("seed file");
        path
    }

    pub fn contents(&self, name: &str) -> Vec<u8> {
        std::fs::read(self.path(name)).expect("read back")
    }
}

pub fn uid() -> u32 {
    unsafe { libc::getuid() }
}

pub fn gid() -> u32 {
    unsafe { libc::getgid() }
}
