//! Native driver: io_uring-backed completion facility behind the
//! `Driver`/`File` contract.

pub mod driver;
pub mod file;
pub mod poll;

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use afio_core::aio::AioOutput;
use afio_core::error::{FileError, Result, TaskError};

pub use driver::AioDriver;
pub use file::AioFile;
pub use poll::PollRegistration;

/// Native path argument. Interior NUL bytes are rejected before any I/O.
pub(crate) fn path_to_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        FileError::InvalidArgument(format!("Path contains a NUL byte: {}.", path.display()))
    })
}

pub(crate) fn unexpected(output: &AioOutput) -> TaskError {
    TaskError::new(format!("Unexpected native result: {:?}.", output))
}
