//! Completion notification abstraction.
//!
//! A `Notifier` wakes the event loop when completions of the native
//! facility are ready to be drained.
//!
//! # Implementors
//!
//! - `EventFdNotifier` (default): writes 1 to an eventfd. The same eventfd
//!   is registered with io_uring, so ring completions and blocking-tier
//!   completions share one wake-up source.

use std::io;
use std::os::fd::RawFd;

/// Wakes the event loop when completions are ready.
///
/// **Contract:**
/// - `notify()` must NEVER block.
/// - Multiple calls before the consumer wakes are coalesced
///   (eventfd semantics: counter increments, one read drains).
pub trait Notifier: Send + Sync {
    fn notify(&self) -> io::Result<()>;

    /// Reset the counter. Returns the accumulated count, or `WouldBlock`
    /// when nothing was pending.
    fn drain(&self) -> io::Result<u64>;

    /// The pollable descriptor.
    fn fd(&self) -> RawFd;
}
