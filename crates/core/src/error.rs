//! Error types for kiwi stores
//!
//! This module defines the error taxonomy shared by every backend.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! `NotFound` is an expected outcome, not a fault: callers must be able to
//! tell a missing version apart from a version whose payload is empty.

use crate::contract::Version;
use std::io;
use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for versioned stores
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the storage medium
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Store cannot be constructed from its configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The key, or the requested version of it, does not exist
    #[error("Not found: {key:?}{}", .version.map(|v| format!(" at version {v}")).unwrap_or_default())]
    NotFound {
        /// Requested key
        key: String,
        /// Requested version, `None` for latest
        version: Option<Version>,
    },

    /// The key cannot be represented by this backend
    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey {
        /// Rejected key
        key: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// The backend does not support this operation
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Relational database error
    #[error("Database error: {0}")]
    Database(String),

    /// Persisted data violates a store invariant
    #[error("Data corruption: {0}")]
    Corruption(String),
}

impl Error {
    /// Build a `NotFound` error for `key` at `version`
    pub fn not_found(key: impl Into<String>, version: Option<Version>) -> Self {
        Error::NotFound {
            key: key.into(),
            version,
        }
    }

    /// Build an `InvalidKey` error
    pub fn invalid_key(key: impl Into<String>, reason: &'static str) -> Self {
        Error::InvalidKey {
            key: key.into(),
            reason,
        }
    }

    /// True if this error reports a missing key or version
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// True if the backend declined the operation
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let err = Error::Io(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_error_display_not_found_latest() {
        let err = Error::not_found("Home", None);
        assert_eq!(err.to_string(), "Not found: \"Home\"");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_error_display_not_found_version() {
        let err = Error::not_found("Home", Some(Version::new(5)));
        assert_eq!(err.to_string(), "Not found: \"Home\" at version 5");
    }

    #[test]
    fn test_error_display_invalid_key() {
        let err = Error::invalid_key("a/b", "contains a path separator");
        let msg = err.to_string();
        assert!(msg.contains("Invalid key"));
        assert!(msg.contains("a/b"));
        assert!(msg.contains("path separator"));
    }

    #[test]
    fn test_error_unsupported_is_distinct() {
        let err = Error::Unsupported("rem");
        assert!(err.is_unsupported());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("rem"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_not_found());
    }
}
