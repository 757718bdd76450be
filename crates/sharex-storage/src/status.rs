use std::fmt;

use crate::error::StorageError;

/// Upload-completion status persisted next to each entry.
///
/// Entries start as `Waiting` when their metadata is inserted and move to
/// `Activated` or `Failed` exactly once, when the write stream is closed. The
/// integer values are stored as-is and must not change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryStatus {
    Waiting = 0,
    Activated = 1,
    Failed = 2,
}

impl EntryStatus {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Whether the status can no longer change.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Waiting)
    }
}

impl TryFrom<i32> for EntryStatus {
    type Error = StorageError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Waiting),
            1 => Ok(Self::Activated),
            2 => Ok(Self::Failed),
            other => Err(StorageError::Decode(format!("unknown entry status {other}"))),
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Activated => write!(f, "activated"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
