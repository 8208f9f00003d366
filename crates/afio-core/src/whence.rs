//! Seek origin and target resolution.

use serde::{Deserialize, Serialize};

use crate::error::{FileError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Whence {
    #[default]
    Start,
    Current,
    End,
}

impl Whence {
    /// Map a raw `SEEK_SET`/`SEEK_CUR`/`SEEK_END` value.
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            libc::SEEK_SET => Ok(Self::Start),
            libc::SEEK_CUR => Ok(Self::Current),
            libc::SEEK_END => Ok(Self::End),
            _ => Err(FileError::InvalidArgument(
                "Invalid whence value. Use SEEK_SET, SEEK_CUR, or SEEK_END.".into(),
            )),
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            Self::Start => libc::SEEK_SET,
            Self::Current => libc::SEEK_CUR,
            Self::End => libc::SEEK_END,
        }
    }

    /// Absolute target for `offset` given the handle's cursor and size.
    ///
    /// Targets past the end are legal; a negative target is `OutOfBounds`.
    pub fn resolve(self, offset: i64, position: u64, size: u64) -> Result<u64> {
        let base = match self {
            Self::Start => 0,
            Self::Current => position,
            Self::End => size,
        };
        let target = i128::from(base) + i128::from(offset);
        if target < 0 {
            return Err(FileError::OutOfBounds(format!("Invalid offset: {}.", target)));
        }
        u64::try_from(target)
            .map_err(|_| FileError::OutOfBounds(format!("Invalid offset: {}.", target)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_against_each_origin() {
        assert_eq!(Whence::Start.resolve(5, 100, 10).unwrap(), 5);
        assert_eq!(Whence::Current.resolve(-3, 7, 10).unwrap(), 4);
        assert_eq!(Whence::End.resolve(0, 2, 10).unwrap(), 10);
        assert_eq!(Whence::End.resolve(10, 2, 10).unwrap(), 20);
    }

    #[test]
    fn negative_target_is_out_of_bounds() {
        assert!(matches!(
            Whence::Start.resolve(-1, 0, 0),
            Err(FileError::OutOfBounds(_))
        ));
        assert!(matches!(
            Whence::End.resolve(-11, 0, 10),
            Err(FileError::OutOfBounds(_))
        ));
    }

    #[test]
    fn raw_values_round_trip() {
        for whence in [Whence::Start, Whence::Current, Whence::End] {
            assert_eq!(Whence::from_raw(whence.as_raw()).unwrap(), whence);
        }
        assert!(matches!(Whence::from_raw(-1), Err(FileError::InvalidArgument(_))));
        assert!(matches!(Whence::from_raw(42), Err(FileError::InvalidArgument(_))));
    }
}
