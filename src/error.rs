//! Error types for the message store.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors surfaced by store operations.
///
/// Any error returned from a mutating call means the surrounding
/// transaction was rolled back; no partial thread state is left behind.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no recipients could be resolved; thread not created")]
    NoRecipients,
    #[error("thread id must be an integer, got {0:?}")]
    InvalidThreadId(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found")]
    NotFound,
    #[error("database version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: i32, supported: i32 },
    #[error("database lock poisoned")]
    LockPoisoned,
    #[error("schema upgrade to version {version} deferred until storage recovers")]
    UpgradeDeferred { version: i32 },
}

impl StoreError {
    /// True for failures caused by the device running out of space.
    ///
    /// These are the only failures that arm the storage monitor instead of
    /// being reported as terminal.
    pub fn is_low_storage(&self) -> bool {
        match self {
            StoreError::Database(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == ErrorCode::DiskFull
            }
            StoreError::Io(err) => err.raw_os_error() == Some(28), // ENOSPC
            StoreError::UpgradeDeferred { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_full_is_low_storage() {
        let err = StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            None,
        ));
        assert!(err.is_low_storage());
    }

    #[test]
    fn test_other_errors_are_not_low_storage() {
        assert!(!StoreError::NoRecipients.is_low_storage());
        let busy = StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(!busy.is_low_storage());
    }
}
