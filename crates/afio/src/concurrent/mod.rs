//! Worker-pool driver: blocking syscalls on pooled worker threads.

pub mod driver;
pub mod file;

pub use driver::ConcurrentDriver;
pub use file::ConcurrentFile;
