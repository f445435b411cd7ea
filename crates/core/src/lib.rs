//! Core types for Hearth
//!
//! This crate defines the foundational types used throughout the system:
//! - Key: opaque byte keys and the namespace rules (`secret:`, `default:`)
//! - Versioned: stored bytes with version, expiry and user meta
//! - SnapshotRecord / SnapshotDocument: the prefix export format
//! - TelemetryState: the structured value shape used to normalize exports
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod key;
pub mod record;
pub mod state;
pub mod value;

pub use error::{Error, Result};
pub use key::{
    is_secret_key, parse_secret_reference, prefix_scope, secret_reference, validate_key, Key,
    KeyError, Namespace, PrefixScope, DEFAULT_PREFIX, MAX_KEY_BYTES, SECRET_PREFIX,
    SECRET_REF_PREFIX,
};
pub use record::{SnapshotDocument, SnapshotRecord};
pub use state::TelemetryState;
pub use value::{expiry_from_ttl, unix_now, Versioned, WriteOptions};
