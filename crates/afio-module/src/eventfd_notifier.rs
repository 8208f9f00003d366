//! `EventFdNotifier`: default `Notifier` implementation.
//!
//! Writes to an eventfd to wake the event loop. Coalescing: multiple calls
//! to `notify()` before the consumer reads the eventfd result in a single
//! wakeup (eventfd counter semantics).

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use afio_core::notifier::Notifier;

pub struct EventFdNotifier {
    fd: OwnedFd,
}

impl EventFdNotifier {
    /// Create a new non-blocking eventfd. Closed on drop.
    pub fn create() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: eventfd returned a fresh descriptor that nothing else owns.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }
}

impl Notifier for EventFdNotifier {
    fn notify(&self) -> io::Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // EAGAIN means the counter would overflow, so a wake-up is
            // already pending.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    fn drain(&self) -> io::Result<u64> {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(val)
    }

    fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_coalesce() {
        let notifier = EventFdNotifier::create().unwrap();
        assert_eq!(
            notifier.drain().unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );

        notifier.notify().unwrap();
        notifier.notify().unwrap();
        notifier.notify().unwrap();
        assert_eq!(notifier.drain().unwrap(), 3);
        assert!(notifier.drain().is_err());
    }
}
