//! Error type shared by every gallery operation.

use thiserror::Error;

/// Failure of a gallery operation.
///
/// `NotFound` and `Validation` are caller errors and are never retried.
/// `Busy` means the store could not take the write lock within the
/// configured wait; the caller may retry.
#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("database is busy, retry later")]
    Busy,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gallery walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

impl GalleryError {
    pub fn not_found(message: impl Into<String>) -> Self {
        GalleryError::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        GalleryError::Validation(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, GalleryError::Busy)
    }
}

// SQLITE_BUSY (5) and SQLITE_LOCKED (6), plus their extended codes.
const BUSY_CODES: &[&str] = &["5", "6", "261", "262", "517", "773"];

impl From<sqlx::Error> for GalleryError {
    fn from(err: sqlx::Error) -> Self {
        let busy = err
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| BUSY_CODES.contains(&code.as_ref()));
        if busy {
            GalleryError::Busy
        } else {
            GalleryError::Storage(err)
        }
    }
}

pub type Result<T, E = GalleryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_busy_is_retryable() {
        assert!(GalleryError::Busy.is_retryable());
        assert!(!GalleryError::not_found("x").is_retryable());
        assert!(!GalleryError::validation("x").is_retryable());
    }

    #[test]
    fn test_non_database_sqlx_error_is_storage() {
        let err: GalleryError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, GalleryError::Storage(_)));
    }
}
