//! Stored values and their engine metadata
//!
//! ## The Contract
//!
//! ```text
//! fn get(&self, ...) -> Result<Option<Versioned>>
//! fn put(&self, ...) -> Result<u64>
//! ```
//!
//! - Reads return `Versioned` (value bytes + version + expiry + user meta)
//! - Writes return the version that was created

use std::time::Duration;

/// Current wall-clock time in unix seconds
#[inline]
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Compute an absolute expiry (unix seconds) from a TTL
///
/// Returns 0 (never) when `ttl` is `None`.
pub fn expiry_from_ttl(ttl: Option<Duration>, now: u64) -> u64 {
    match ttl {
        Some(ttl) => now.saturating_add(ttl.as_secs().max(1)),
        None => 0,
    }
}

/// A value with its engine metadata
///
/// ## Invariants
///
/// - `version` always matches the commit that created this data
/// - `expires_at` is absolute unix seconds, 0 meaning never
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    /// The stored bytes
    pub value: Vec<u8>,
    /// Store-wide commit counter at the time of the write
    pub version: u64,
    /// Absolute expiry in unix seconds (0 = never)
    pub expires_at: u64,
    /// One byte of caller-defined flags
    pub user_meta: u8,
}

impl Versioned {
    /// Create a versioned value with no expiry and no user meta
    pub fn new(value: Vec<u8>, version: u64) -> Self {
        Versioned {
            value,
            version,
            expires_at: 0,
            user_meta: 0,
        }
    }

    /// Check whether this version has expired at `now` (unix seconds)
    #[inline]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at != 0 && self.expires_at <= now
    }

    /// Value as UTF-8, replacing invalid sequences
    pub fn value_lossy(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }

    /// Consume and return the value bytes
    #[inline]
    pub fn into_value(self) -> Vec<u8> {
        self.value
    }
}

/// Per-write options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Time-to-live; `None` never expires
    pub ttl: Option<Duration>,
    /// One byte of caller-defined flags
    pub user_meta: u8,
}

impl WriteOptions {
    /// Options with a TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        WriteOptions {
            ttl: Some(ttl),
            user_meta: 0,
        }
    }
}
