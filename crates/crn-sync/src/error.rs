//! Error types for the synchronization engine.

use thiserror::Error;

/// Errors that can occur while synchronizing a product.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Failed to fetch {path}: {reason}")]
    Fetch { path: String, reason: String },

    #[error("Malformed record in {path} at line {line}: {source}")]
    MalformedRecord {
        path: String,
        line: usize,
        #[source]
        source: RecordError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Invalid name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Unknown product: {0}")]
    UnknownProduct(String),
}

impl SyncError {
    /// Whether the error only invalidates the file being processed.
    ///
    /// File-scoped errors roll back that file and let the run continue with
    /// the next candidate; everything else aborts the run.
    pub fn is_file_scoped(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::MalformedRecord { .. })
    }
}

/// Reasons a single raw line cannot be turned into a row.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("time field {value:?} is shorter than {width} characters")]
    ShortTimeField { value: String, width: usize },

    #[error("column {column} has unusable value {value:?}")]
    InvalidField { column: &'static str, value: String },

    #[error("key column {column} is missing")]
    MissingKey { column: &'static str },
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_scoped_errors() {
        let fetch = SyncError::Fetch {
            path: "/a".to_string(),
            reason: "gone".to_string(),
        };
        let malformed = SyncError::MalformedRecord {
            path: "/a".to_string(),
            line: 3,
            source: RecordError::FieldCount {
                expected: 28,
                found: 7,
            },
        };
        assert!(fetch.is_file_scoped());
        assert!(malformed.is_file_scoped());
        assert!(!SyncError::RemoteUnavailable("timeout".to_string()).is_file_scoped());
    }

    #[test]
    fn test_malformed_message_names_line() {
        let err = SyncError::MalformedRecord {
            path: "/pub/x.txt".to_string(),
            line: 12,
            source: RecordError::MissingKey { column: "wban" },
        };
        let message = err.to_string();
        assert!(message.contains("/pub/x.txt"));
        assert!(message.contains("line 12"));
        assert!(message.contains("wban"));
    }
}
