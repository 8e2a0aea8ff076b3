//! Database error types.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Database error type.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The store could not be reached (closed executor, unopenable file).
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The stream could not make room for a new record.
    #[error("Storage full for stream {0}")]
    StorageFull(String),

    /// The schema could not be brought up to date.
    #[error("Migration error: {0}")]
    Migration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DatabaseError {
    /// Whether the failure means the store itself is unreachable.
    ///
    /// Callers treat these as transient: durable rows are untouched and the
    /// operation may be retried later.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Io(_) => true,
            Self::Sqlite(e) => matches!(
                e.sqlite_error_code(),
                Some(
                    ErrorCode::CannotOpen
                        | ErrorCode::SystemIoFailure
                        | ErrorCode::DatabaseBusy
                        | ErrorCode::DatabaseLocked
                        | ErrorCode::ReadOnly
                )
            ),
            _ => false,
        }
    }
}

/// Result type alias using DatabaseError.
pub type DatabaseResult<T> = Result<T, DatabaseError>;
