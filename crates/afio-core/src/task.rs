//! Worker task protocol.
//!
//! A [`Task`] is an immutable, serializable description of one filesystem
//! operation. Tasks that act on an open file carry the [`HandleId`] issued
//! by the worker that opened it; ids are meaningless to any other worker.
//!
//! ```text
//!   driver ──Task──► worker inbox ──► executor (handle table)
//!      ▲                                   │
//!      └──────── Result<TaskOutput, TaskError> ◄┘
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::mode::OpenMode;
use crate::stat::StatRecord;

/// Generational id of an open file inside one worker's handle table.
///
/// A slot reused after `Close` gets a new generation, so a stale id is
/// rejected instead of aliasing another file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl HandleId {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    // ── Handle operations ──
    Open { path: PathBuf, mode: OpenMode },
    Read { handle: HandleId, length: usize },
    Write { handle: HandleId, data: Vec<u8> },
    Seek { handle: HandleId, offset: u64 },
    Fstat { handle: HandleId },
    Ftruncate { handle: HandleId, size: u64 },
    Close { handle: HandleId },

    // ── Path operations ──
    Stat { path: PathBuf },
    Unlink { path: PathBuf },
    Rename { from: PathBuf, to: PathBuf },
    Copy { from: PathBuf, to: PathBuf },
    Link { source: PathBuf, target: PathBuf },
    Symlink { source: PathBuf, target: PathBuf },
    Readlink { path: PathBuf },
    IsFile { path: PathBuf },
    IsDir { path: PathBuf },
    Mkdir { path: PathBuf, mode: u32 },
    Lsdir { path: PathBuf },
    Rmdir { path: PathBuf },
    Chmod { path: PathBuf, mode: u32 },
    Chown { path: PathBuf, uid: u32 },
    Chgrp { path: PathBuf, gid: u32 },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Seek { .. } => "seek",
            Self::Fstat { .. } => "fstat",
            Self::Ftruncate { .. } => "ftruncate",
            Self::Close { .. } => "close",
            Self::Stat { .. } => "stat",
            Self::Unlink { .. } => "unlink",
            Self::Rename { .. } => "rename",
            Self::Copy { .. } => "copy",
            Self::Link { .. } => "link",
            Self::Symlink { .. } => "symlink",
            Self::Readlink { .. } => "readlink",
            Self::IsFile { .. } => "isfile",
            Self::IsDir { .. } => "isdir",
            Self::Mkdir { .. } => "mkdir",
            Self::Lsdir { .. } => "lsdir",
            Self::Rmdir { .. } => "rmdir",
            Self::Chmod { .. } => "chmod",
            Self::Chown { .. } => "chown",
            Self::Chgrp { .. } => "chgrp",
        }
    }

    /// The open-file handle this task targets, if any.
    pub fn handle(&self) -> Option<HandleId> {
        match self {
            Self::Read { handle, .. }
            | Self::Write { handle, .. }
            | Self::Seek { handle, .. }
            | Self::Fstat { handle }
            | Self::Ftruncate { handle, .. }
            | Self::Close { handle } => Some(*handle),
            _ => None,
        }
    }
}

/// Successful result of a [`Task`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutput {
    Opened { handle: HandleId, size: u64, append: bool },
    Data(Vec<u8>),
    Written(usize),
    Position(u64),
    Stat(StatRecord),
    Flag(bool),
    Copied(u64),
    Path(PathBuf),
    Names(Vec<String>),
    Done,
}

fn unexpected(expected: &str, got: &TaskOutput) -> TaskError {
    TaskError::new(format!(
        "Unexpected task result: expected {}, got {:?}.",
        expected, got
    ))
}

macro_rules! into_variant {
    ($fn_name:ident, $variant:ident, $ty:ty) => {
        pub fn $fn_name(self) -> Result<$ty, TaskError> {
            match self {
                Self::$variant(value) => Ok(value),
                other => Err(unexpected(stringify!($variant), &other)),
            }
        }
    };
}

impl TaskOutput {
    pub fn into_opened(self) -> Result<(HandleId, u64, bool), TaskError> {
        match self {
            Self::Opened { handle, size, append } => Ok((handle, size, append)),
            other => Err(unexpected("Opened", &other)),
        }
    }

    into_variant!(into_data, Data, Vec<u8>);
    into_variant!(into_written, Written, usize);
    into_variant!(into_position, Position, u64);
    into_variant!(into_stat, Stat, StatRecord);
    into_variant!(into_flag, Flag, bool);
    into_variant!(into_copied, Copied, u64);
    into_variant!(into_path, Path, PathBuf);
    into_variant!(into_names, Names, Vec<String>);

    pub fn into_done(self) -> Result<(), TaskError> {
        match self {
            Self::Done => Ok(()),
            other => Err(unexpected("Done", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_tasks_expose_their_handle() {
        let handle = HandleId::new(3, 7);
        assert_eq!(Task::Fstat { handle }.handle(), Some(handle));
        assert_eq!(Task::Stat { path: "/tmp".into() }.handle(), None);
        assert_eq!(Task::Close { handle }.name(), "close");
    }

    #[test]
    fn output_accessors_reject_other_variants() {
        assert_eq!(TaskOutput::Written(4).into_written().unwrap(), 4);
        assert!(TaskOutput::Done.into_written().is_err());
        assert!(TaskOutput::Flag(true).into_done().is_err());
    }

    #[test]
    fn tasks_serialize() {
        let task = Task::Open {
            path: "/tmp/x".into(),
            mode: OpenMode::parse("c+").unwrap(),
        };
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }
}
