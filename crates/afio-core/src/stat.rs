//! Stat records.
//!
//! Positional keys `0..=12` and the named keys in [`STAT_KEYS`] are two
//! views of the same thirteen values:
//!
//! ```text
//!   0 dev   1 ino    2 mode    3 nlink  4 uid     5 gid    6 rdev
//!   7 size  8 atime  9 mtime  10 ctime 11 blksize 12 blocks
//! ```

use std::fs::Metadata;
use std::ops::Index;
use std::os::unix::fs::MetadataExt;

use serde::{Deserialize, Serialize};

pub const STAT_KEYS: [&str; 13] = [
    "dev", "ino", "mode", "nlink", "uid", "gid", "rdev", "size", "atime", "mtime", "ctime",
    "blksize", "blocks",
];

const MODE: usize = 2;
const UID: usize = 4;
const GID: usize = 5;
const SIZE: usize = 7;
const MTIME: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatRecord {
    values: [i64; 13],
}

impl StatRecord {
    /// Build from values ordered as [`STAT_KEYS`].
    pub const fn from_values(values: [i64; 13]) -> Self {
        Self { values }
    }

    pub fn from_metadata(meta: &Metadata) -> Self {
        Self::from_values([
            meta.dev() as i64,
            meta.ino() as i64,
            i64::from(meta.mode()),
            meta.nlink() as i64,
            i64::from(meta.uid()),
            i64::from(meta.gid()),
            meta.rdev() as i64,
            meta.size() as i64,
            meta.atime(),
            meta.mtime(),
            meta.ctime(),
            meta.blksize() as i64,
            meta.blocks() as i64,
        ])
    }

    pub fn values(&self) -> &[i64; 13] {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        STAT_KEYS
            .iter()
            .position(|k| *k == key)
            .map(|i| self.values[i])
    }

    /// `(index, name, value)` for every key.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &'static str, i64)> + '_ {
        STAT_KEYS
            .iter()
            .enumerate()
            .map(move |(i, name)| (i, *name, self.values[i]))
    }

    pub fn size(&self) -> u64 {
        self.values[SIZE].max(0) as u64
    }

    pub fn mode(&self) -> u32 {
        self.values[MODE] as u32
    }

    pub fn uid(&self) -> u32 {
        self.values[UID] as u32
    }

    pub fn gid(&self) -> u32 {
        self.values[GID] as u32
    }

    pub fn mtime(&self) -> i64 {
        self.values[MTIME]
    }

    pub fn is_file(&self) -> bool {
        self.mode() & libc::S_IFMT == libc::S_IFREG
    }

    pub fn is_dir(&self) -> bool {
        self.mode() & libc::S_IFMT == libc::S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode() & libc::S_IFMT == libc::S_IFLNK
    }
}

impl From<&Metadata> for StatRecord {
    fn from(meta: &Metadata) -> Self {
        Self::from_metadata(meta)
    }
}

impl Index<usize> for StatRecord {
    type Output = i64;

    fn index(&self, index: usize) -> &i64 {
        &self.values[index]
    }
}

impl Index<&str> for StatRecord {
    type Output = i64;

    /// Panics on an unknown key, like `HashMap`'s `Index`.
    fn index(&self, key: &str) -> &i64 {
        match STAT_KEYS.iter().position(|k| *k == key) {
            Some(i) => &self.values[i],
            None => panic!("unknown stat key: {}", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_and_named_views_agree() {
        let record = StatRecord::from_values([1, 2, 0o100644, 1, 1000, 1000, 0, 42, 3, 4, 5, 4096, 8]);
        for (i, name, value) in record.entries() {
            assert_eq!(record[i], value);
            assert_eq!(record[name], value);
            assert_eq!(record.get(name), Some(value));
        }
        assert_eq!(record.size(), 42);
        assert!(record.is_file());
        assert!(!record.is_dir());
        assert_eq!(record.get("nope"), None);
    }

    #[test]
    fn built_from_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello").unwrap();

        let record = StatRecord::from(&std::fs::metadata(&path).unwrap());
        assert_eq!(record.size(), 5);
        assert_eq!(record["size"], 5);
        assert!(record.is_file());

        let dir_record = StatRecord::from(&std::fs::metadata(dir.path()).unwrap());
        assert!(dir_record.is_dir());
    }
}
