//! Error types for the persistence adapter

use std::path::PathBuf;

/// Errors raised by storage backends and the [`crate::Storage`] facade
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem failure in a file-backed store
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Record could not be encoded or decoded
    #[error("serialization failed for '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Backend rejected or lost the operation
    #[error("backend error: {0}")]
    Backend(String),

    /// Write did not finish inside the write timeout
    #[error("write timed out after {timeout_ms}ms")]
    WriteTimeout { timeout_ms: u64 },
}

impl StorageError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create serialization error for key
    pub fn serialization(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            key: key.into(),
            source,
        }
    }

    /// Check if the error is transient (worth retrying later)
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::WriteTimeout { .. } | Self::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_display() {
        let err = StorageError::WriteTimeout { timeout_ms: 250 };
        assert_eq!(err.to_string(), "write timed out after 250ms");

        let err = StorageError::Backend("quota exceeded".to_string());
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn storage_error_transient() {
        assert!(StorageError::Backend("x".into()).is_transient());
        assert!(StorageError::WriteTimeout { timeout_ms: 1 }.is_transient());

        let bad = serde_json::from_str::<u32>("nope").unwrap_err();
        assert!(!StorageError::serialization("k", bad).is_transient());
    }
}
