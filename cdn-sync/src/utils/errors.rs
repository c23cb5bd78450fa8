//! Custom error types for cdn-sync.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Write precondition failed for {0}")]
    Conflict(String),

    #[error("Operation not supported by the storage backend: {0}")]
    NotImplemented(String),

    #[error("Storage error: {0}")]
    Store(String),

    #[error("Timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Store(_) | SyncError::Timeout { .. } | SyncError::Http(_))
    }
}

impl From<object_store::Error> for SyncError {
    fn from(e: object_store::Error) -> Self {
        match e {
            object_store::Error::NotFound { path, .. } => SyncError::NotFound(path),
            object_store::Error::Precondition { path, .. }
            | object_store::Error::AlreadyExists { path, .. } => SyncError::Conflict(path),
            object_store::Error::NotImplemented => {
                SyncError::NotImplemented("conditional or attributed put".to_string())
            }
            other => SyncError::Store(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Task(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_store_errors_are_classified() {
        let not_found = object_store::Error::NotFound {
            path: "a.css".to_string(),
            source: "missing".into(),
        };
        assert!(matches!(SyncError::from(not_found), SyncError::NotFound(p) if p == "a.css"));

        let precondition = object_store::Error::Precondition {
            path: ".upload-manifest.json".to_string(),
            source: "etag mismatch".into(),
        };
        assert!(matches!(SyncError::from(precondition), SyncError::Conflict(_)));

        let generic = object_store::Error::Generic {
            store: "S3",
            source: "503 Slow Down".into(),
        };
        let err = SyncError::from(generic);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_local_errors_are_not_retryable() {
        let err = SyncError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(!err.is_retryable());
        assert!(!SyncError::Config("missing bucket".into()).is_retryable());
    }
}
