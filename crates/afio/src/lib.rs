//! # afio: async filesystem I/O for tokio
//!
//! Filesystem operations as futures on a single-threaded tokio runtime,
//! even though the OS only offers blocking or completion-based calls.
//! Two drivers implement the same [`Driver`]/[`File`] contract:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │   caller: driver.open(path, "r+").await?.read(0, None, None) │
//! └───────────────┬──────────────────────────────┬───────────────┘
//!                 │                              │
//!   ┌─────────────▼─────────────┐  ┌─────────────▼──────────────┐
//!   │ ConcurrentDriver          │  │ AioDriver                  │
//!   │  Task ─► WorkerPool       │  │  AioOp ─► UringAio         │
//!   │  ThreadWorker (std::fs)   │  │  io_uring + blocking tier  │
//!   │  oneshot reply            │  │  eventfd ─► AsyncFd watcher│
//!   └───────────────────────────┘  └────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use afio::{AfioConfig, AioDriver, Driver};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> afio::Result<()> {
//!     let driver: Arc<dyn Driver> = Arc::new(AioDriver::new(&AfioConfig::from_env())?);
//!     let file = driver.open("/tmp/hello".as_ref(), "w").await?;
//!     file.end(b"hello\n".to_vec(), None).await?;
//!     Ok(())
//! }
//! ```
//!
//! There is no global driver: build one and pass it around.

pub mod aio;
pub mod chain;
pub mod concurrent;

pub use afio_core::{
    AfioConfig, Driver, File, FileError, OpenMode, Result, StatRecord, TaskError, Whence,
    CHUNK_SIZE, DEFAULT_DIR_MODE,
};
pub use aio::{AioDriver, AioFile};
pub use concurrent::{ConcurrentDriver, ConcurrentFile};
