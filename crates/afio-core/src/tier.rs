//! Tier classification for native operations.

/// Which execution tier of the native facility handles an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tier {
    /// Translated to an io_uring SQE. io-wq handles blocking in the kernel.
    IoUring = 1,

    /// Executed by a blocking thread of the facility. For operations
    /// without an io_uring opcode, or when io_uring is unavailable.
    Blocking = 2,
}
