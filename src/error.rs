//! Error types for apicache
//!
//! Storage, fetch and key-derivation failures are kept as distinct types so a
//! caller can always tell "could not reach the backend" apart from "could not
//! persist the result".

use thiserror::Error;

/// Errors raised by the entry store
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite rejected an operation (locked, unreadable, not a database, ...)
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem error while preparing the store location
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be decoded
    #[error("corrupt version {sequence} for {fingerprint}: {reason}")]
    Corrupt {
        fingerprint: String,
        sequence: u64,
        reason: String,
    },

    /// The file was written by a newer schema than this build understands
    #[error("unsupported store schema version {found} (expected at most {supported})")]
    UnsupportedSchema { found: i64, supported: i64 },

    /// No location was configured and the platform has no cache directory
    #[error("no cache location configured and no platform cache directory available")]
    NoDefaultLocation,

    /// A thread panicked while holding the store connection
    #[error("store connection lock poisoned")]
    LockPoisoned,
}

/// Failure reported by a fetch callback
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FetchError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FetchError {
    /// Creates a fetch error from a plain message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a fetch error wrapping an underlying cause
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The human-readable message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        let message = match err.status() {
            Some(status) => format!("HTTP request failed with status {}", status),
            None => "HTTP request failed".to_string(),
        };
        Self::with_source(message, err)
    }
}

/// Request parameters could not be brought into canonical form
#[derive(Debug, Error)]
pub enum KeyDerivationError {
    /// serde could not represent the parameters as JSON
    #[error("parameters are not serializable: {0}")]
    Unserializable(#[from] serde_json::Error),

    /// The parameters serialized to something other than a mapping
    #[error("parameters must serialize to a mapping, found {found}")]
    NotAMapping { found: &'static str },
}

/// Top-level error returned by cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    KeyDerivation(#[from] KeyDerivationError),
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_fetch_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = FetchError::with_source("backend unreachable", io);

        assert_eq!(err.to_string(), "backend unreachable");
        assert_eq!(err.message(), "backend unreachable");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_cache_error_kinds_are_distinguishable() {
        let fetch: CacheError = FetchError::new("boom").into();
        let storage: CacheError = StorageError::LockPoisoned.into();
        let key: CacheError = KeyDerivationError::NotAMapping { found: "array" }.into();

        assert!(matches!(fetch, CacheError::Fetch(_)));
        assert!(matches!(storage, CacheError::Storage(_)));
        assert!(matches!(key, CacheError::KeyDerivation(_)));
        assert_eq!(
            key.to_string(),
            "parameters must serialize to a mapping, found array"
        );
    }
}
