//! Storage-layer error type. Converts into `license_core::CoreError` at
//! crate boundaries.

use license_core::CoreError;
use thiserror::Error;

/// Errors from a repository implementation.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No row matched the lookup.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An optimistic-version compare-and-swap lost the race.
    #[error("version conflict on {id}: expected version {expected}, found {actual}")]
    VersionConflict {
        /// The row identifier.
        id: String,
        /// The version the caller expected to replace.
        expected: u64,
        /// The version actually stored.
        actual: u64,
    },

    /// The underlying engine (in-memory lock, Postgres connection) failed.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => CoreError::NotFound(msg),
            StorageError::Conflict(msg) => CoreError::Conflict(msg),
            StorageError::VersionConflict { id, expected, actual } => CoreError::Conflict(format!(
                "version conflict on {id}: expected {expected}, found {actual}"
            )),
            StorageError::Backend(msg) => CoreError::Storage(msg),
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound("row not found".to_string()),
            other => StorageError::Backend(other.to_string()),
        }
    }
}
