//! Open-mode vocabulary.
//!
//! `r, r+, w, w+, a, a+, x, x+, c, c+`, with one trailing `b` or `t`
//! accepted and ignored.
//! Anything else is rejected before any I/O.
//!
//! | mode | access | truncate | create | exclusive | append |
//! |------|--------|----------|--------|-----------|--------|
//! | r    | R      |          |        |           |        |
//! | w    | W      | yes      | yes    |           |        |
//! | a    | W      |          | yes    |           | yes    |
//! | x    | W      |          | yes    | yes       |        |
//! | c    | W      |          | yes    |           |        |
//!
//! A `+` suffix adds the missing direction (read-write).

use std::fmt;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::str::FromStr;

use nix::fcntl::OFlag;
use serde::{Deserialize, Serialize};

use crate::error::{FileError, Result};
use crate::DEFAULT_CREATE_MODE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Access {
    Read,
    Write,
    Append,
    Exclusive,
    Create,
}

/// A validated open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpenMode {
    access: Access,
    update: bool,
}

impl OpenMode {
    pub fn parse(mode: &str) -> Result<Self> {
        let base = mode
            .strip_suffix('b')
            .or_else(|| mode.strip_suffix('t'))
            .unwrap_or(mode);
        let (access, update) = match base {
            "r" => (Access::Read, false),
            "r+" => (Access::Read, true),
            "w" => (Access::Write, false),
            "w+" => (Access::Write, true),
            "a" => (Access::Append, false),
            "a+" => (Access::Append, true),
            "x" => (Access::Exclusive, false),
            "x+" => (Access::Exclusive, true),
            "c" => (Access::Create, false),
            "c+" => (Access::Create, true),
            _ => {
                return Err(FileError::InvalidArgument(format!(
                    "Invalid file open mode: {:?}.",
                    mode
                )))
            }
        };
        Ok(Self { access, update })
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn readable(&self) -> bool {
        self.update || self.access == Access::Read
    }

    pub fn writable(&self) -> bool {
        self.update || self.access != Access::Read
    }

    pub fn append(&self) -> bool {
        self.access == Access::Append
    }

    pub fn truncate(&self) -> bool {
        self.access == Access::Write
    }

    pub fn create(&self) -> bool {
        self.access != Access::Read
    }

    pub fn exclusive(&self) -> bool {
        self.access == Access::Exclusive
    }

    /// `open(2)` flags for this mode. Always close-on-exec.
    pub fn flags(&self) -> OFlag {
        let mut flags = match (self.readable(), self.writable()) {
            (true, true) => OFlag::O_RDWR,
            (false, true) => OFlag::O_WRONLY,
            _ => OFlag::O_RDONLY,
        };
        if self.truncate() {
            flags |= OFlag::O_TRUNC;
        }
        if self.create() {
            flags |= OFlag::O_CREAT;
        }
        if self.exclusive() {
            flags |= OFlag::O_EXCL;
        }
        if self.append() {
            flags |= OFlag::O_APPEND;
        }
        flags | OFlag::O_CLOEXEC
    }

    /// Equivalent `std` options, used by the worker-side executor.
    pub fn open_options(&self) -> OpenOptions {
        let mut options = OpenOptions::new();
        options
            .read(self.readable())
            .write(self.writable() && !self.append())
            .append(self.append())
            .truncate(self.truncate())
            .mode(DEFAULT_CREATE_MODE);
        if self.exclusive() {
            options.create_new(true);
        } else {
            options.create(self.create());
        }
        options
    }

    pub fn as_str(&self) -> &'static str {
        match (self.access, self.update) {
            (Access::Read, false) => "r",
            (Access::Read, true) => "r+",
            (Access::Write, false) => "w",
            (Access::Write, true) => "w+",
            (Access::Append, false) => "a",
            (Access::Append, true) => "a+",
            (Access::Exclusive, false) => "x",
            (Access::Exclusive, true) => "x+",
            (Access::Create, false) => "c",
            (Access::Create, true) => "c+",
        }
    }
}

impl FromStr for OpenMode {
    type Err = FileError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_mode() {
        for mode in ["r", "r+", "w", "w+", "a", "a+", "x", "x+", "c", "c+"] {
            assert_eq!(OpenMode::parse(mode).unwrap().as_str(), mode);
        }
    }

    #[test]
    fn binary_and_text_flags_are_ignored() {
        assert_eq!(OpenMode::parse("rb").unwrap().as_str(), "r");
        assert_eq!(OpenMode::parse("w+b").unwrap().as_str(), "w+");
        assert_eq!(OpenMode::parse("r+t").unwrap().as_str(), "r+");
        assert_eq!(OpenMode::parse("at").unwrap().as_str(), "a");
    }

    #[test]
    fn rejects_unknown_modes() {
        for mode in ["", "z", "rw", "r++", "b", "++", "br", "rb+", "rbb", "rtb"] {
            assert!(matches!(
                OpenMode::parse(mode),
                Err(FileError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn flags_match_open_semantics() {
        let w = OpenMode::parse("w").unwrap().flags();
        assert!(w.contains(OFlag::O_WRONLY | OFlag::O_TRUNC | OFlag::O_CREAT));

        let a_plus = OpenMode::parse("a+").unwrap().flags();
        assert!(a_plus.contains(OFlag::O_RDWR | OFlag::O_APPEND | OFlag::O_CREAT));

        let x = OpenMode::parse("x").unwrap().flags();
        assert!(x.contains(OFlag::O_EXCL | OFlag::O_CREAT));

        let c_plus = OpenMode::parse("c+").unwrap().flags();
        assert!(c_plus.contains(OFlag::O_RDWR | OFlag::O_CREAT));
        assert!(!c_plus.contains(OFlag::O_TRUNC));

        let r = OpenMode::parse("r").unwrap();
        assert!(r.readable() && !r.writable());
        assert!(!r.flags().contains(OFlag::O_CREAT));
    }

    #[test]
    fn open_options_follow_the_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"data").unwrap();

        assert!(OpenMode::parse("x").unwrap().open_options().open(&path).is_err());
        OpenMode::parse("w").unwrap().open_options().open(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }
}
