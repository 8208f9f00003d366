//! # afio-core: trait definitions for afio
//!
//! This crate defines the trait boundaries of the async filesystem bridge.
//! Each trait models one capability dimension:
//!
//! - [`driver::Driver`] / [`file::File`]: the backend-agnostic contract
//!   callers program against.
//! - [`worker::Worker`]: a long-lived executor of [`task::Task`] values
//!   (the worker-pool backend).
//! - [`aio::AioBackend`]: a callback-completion facility multiplexed through
//!   one eventfd (the native backend).
//! - [`router::OpRouter`] / [`notifier::Notifier`]: the plumbing inside the
//!   native facility.
//!
//! Default implementations live in `afio-module`; the drivers that tie them
//! to a tokio event loop live in `afio`.
//!
//! ## Design principle
//!
//! > "Program to the interface. Start safe. Optimize with a new impl,
//! >  not by modifying the existing one."

pub mod error;
pub mod mode;
pub mod whence;
pub mod stat;
pub mod sort;
pub mod task;
pub mod driver;
pub mod file;
pub mod worker;
pub mod tier;
pub mod router;
pub mod notifier;
pub mod aio;
pub mod env;
pub mod config;

pub use config::AfioConfig;
pub use driver::Driver;
pub use error::{FileError, Result, TaskError};
pub use file::File;
pub use mode::OpenMode;
pub use stat::StatRecord;
pub use task::{HandleId, Task, TaskOutput};
pub use whence::Whence;

/// Default read size when a caller passes a length of zero.
pub const CHUNK_SIZE: usize = 8192;

/// Permission bits used when an open creates the file.
pub const DEFAULT_CREATE_MODE: u32 = 0o644;

/// Permission bits used by `mkdir` when the caller has no preference.
pub const DEFAULT_DIR_MODE: u32 = 0o755;
