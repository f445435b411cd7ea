//! Error types for Hearth
//!
//! One error type is shared by every layer. We use `thiserror` for automatic
//! `Display` and `Error` trait implementations.
//!
//! Errors never carry value payloads. Secret values in particular must not
//! leak through `Display` or `Debug`, since errors end up in logs.

use std::io;

use thiserror::Error;

use crate::key::KeyError;

/// Result type alias for Hearth operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Hearth
#[derive(Debug, Error)]
pub enum Error {
    /// Key and its default are both absent
    #[error("Key not found: {key}")]
    NotFound {
        /// The requested key
        key: String,
    },

    /// Cross-namespace access attempt
    #[error("Access to '{key}' is forbidden: {reason}")]
    Forbidden {
        /// The offending key or prefix
        key: String,
        /// Why the access was refused
        reason: &'static str,
    },

    /// Malformed request input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transaction, commit or iteration failure
    #[error("Storage error: {0}")]
    Store(String),

    /// Data corruption detected in the value log
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// The store has been closed
    #[error("Store is closed")]
    Closed,

    /// An orchestration call failed
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a `NotFound` error
    pub fn not_found(key: impl std::fmt::Display) -> Self {
        Error::NotFound {
            key: key.to_string(),
        }
    }

    /// Build a `Forbidden` error
    pub fn forbidden(key: impl std::fmt::Display, reason: &'static str) -> Self {
        Error::Forbidden {
            key: key.to_string(),
            reason,
        }
    }

    /// Build a `Store` error
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// Build a `Provisioning` error
    pub fn provisioning(msg: impl Into<String>) -> Self {
        Error::Provisioning(msg.into())
    }

    /// Build an `InvalidInput` error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// True for `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// True for `Forbidden`
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Error::Forbidden { .. })
    }

    /// True for faults of the store itself (I/O, commit, corruption, closed)
    pub fn is_store_fault(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Store(_) | Error::Corruption(_) | Error::Closed
        )
    }
}

impl From<KeyError> for Error {
    fn from(e: KeyError) -> Self {
        Error::InvalidInput(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::not_found("tHome");
        assert_eq!(err.to_string(), "Key not found: tHome");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_error_display_forbidden() {
        let err = Error::forbidden("secret:apiToken", "secret namespace");
        let msg = err.to_string();
        assert!(msg.contains("forbidden"));
        assert!(msg.contains("secret:apiToken"));
        assert!(err.is_forbidden());
        assert!(!err.is_store_fault());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_store_fault());
    }

    #[test]
    fn test_error_from_key_error() {
        let err: Error = KeyError::Empty.into();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_store_fault_classification() {
        assert!(Error::Closed.is_store_fault());
        assert!(Error::Corruption("crc".into()).is_store_fault());
        assert!(Error::store("commit failed").is_store_fault());
        assert!(!Error::provisioning("docker down").is_store_fault());
        assert!(!Error::not_found("x").is_store_fault());
    }
}
