//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during blob storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Blob not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Blob name would escape the storage directory.
    #[error("invalid blob name: {0}")]
    InvalidName(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::NotFound("17.pdf".to_string());
        assert_eq!(err.to_string(), "not found: 17.pdf");
    }
}
