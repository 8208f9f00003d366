//! afio error types.
//!
//! Two layers:
//!
//! - [`TaskError`] is what a backend reports: a message plus the OS error
//!   code when there is one. It is serializable because it crosses the
//!   worker protocol.
//! - [`FileError`] is the public taxonomy. Backend failures are always
//!   re-wrapped with a contextual message ("Opening the file failed.")
//!   before reaching the caller.

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a backend while executing one operation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
    /// Raw OS error (`errno`), when the failure came from a syscall.
    pub code: Option<i32>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Wrap an I/O error, keeping its errno.
    pub fn from_io(context: &str, err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => Self {
                message: format!("{} Errno: {}; {}", context, code, err),
                code: Some(code),
            },
            None => Self {
                message: format!("{} {}", context, err),
                code: None,
            },
        }
    }

    /// Wrap a positive errno value.
    pub fn from_errno(context: &str, errno: i32) -> Self {
        Self::from_io(context, &io::Error::from_raw_os_error(errno))
    }
}

/// Public error taxonomy shared by every driver and file handle.
#[derive(Debug, Error)]
pub enum FileError {
    /// The path could not be opened with the requested mode.
    #[error("{context} {source}")]
    Open {
        context: String,
        #[source]
        source: TaskError,
    },

    /// A backend task failed.
    #[error("{context} {source}")]
    Task {
        context: String,
        #[source]
        source: TaskError,
    },

    /// Generic operation failure detected by the driver itself.
    #[error("{message}")]
    Operation { message: String, code: Option<i32> },

    /// Bad argument (mode string, whence, path with interior NUL).
    #[error("{0}")]
    InvalidArgument(String),

    /// Seek target before the start of the file.
    #[error("{0}")]
    OutOfBounds(String),

    #[error("{0}")]
    Unreadable(String),

    #[error("{0}")]
    Unwritable(String),

    #[error("{0}")]
    Unseekable(String),

    /// Operation on a closed handle, or a queued write rejected by `close`.
    #[error("{0}")]
    Closed(String),

    #[error("The operation timed out after {0:?}.")]
    Timeout(Duration),
}

impl FileError {
    pub fn open(context: impl Into<String>, source: TaskError) -> Self {
        Self::Open {
            context: context.into(),
            source,
        }
    }

    pub fn task(context: impl Into<String>, source: TaskError) -> Self {
        Self::Task {
            context: context.into(),
            source,
        }
    }

    /// The OS error code behind this failure, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Open { source, .. } | Self::Task { source, .. } => source.code,
            Self::Operation { code, .. } => *code,
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, FileError>;
