//! Error types for the storage layer.
//!
//! Every backend surfaces failures through [`StorageError`] via
//! [`StorageResult`].  Backend-specific failures (SQLite codes, driver
//! errors, HTTP statuses) are translated into one of these variants at the
//! edge of each backend, so callers never inspect backend-shaped errors.

use thiserror::Error;

/// Alias for `Result<T, StorageError>`.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in any storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The entity an operation requires does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The backend deliberately does not expose this operation.
    #[error("operation `{operation}` is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// A uniqueness constraint was violated (e.g. duplicate email).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backend is unreachable or its handle is unusable.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Any other backend failure, with the original message preserved.
    #[error("storage error: {0}")]
    Unknown(String),
}

impl StorageError {
    /// Shorthand for a missing user.
    pub fn user_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "user",
            id: id.into(),
        }
    }

    /// Whether the failure points at the backend handle itself rather than
    /// the data, i.e. a reconnect may help.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(failure, message) => match failure.code {
                ErrorCode::ConstraintViolation => Self::Conflict(
                    message.clone().unwrap_or_else(|| err.to_string()),
                ),
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::SystemIoFailure
                | ErrorCode::ReadOnly => Self::Connectivity(err.to_string()),
                _ if message
                    .as_deref()
                    .is_some_and(|m| m.starts_with("no such table")) =>
                {
                    Self::Connectivity(err.to_string())
                }
                _ => Self::Unknown(err.to_string()),
            },
            _ => Self::Unknown(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unknown(format!("json error: {err}"))
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Unknown(format!("background task failed: {err}"))
    }
}
