//! Storage-layer value wrapper with tombstone support
//!
//! The contract type `Versioned` has no notion of deletion because deletion
//! is a storage concern. This module provides `StoredValue`, which combines a
//! `Versioned` with a tombstone flag for the storage layer.

use hearth_core::Versioned;

/// A stored version of a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    /// The versioned value (bytes + version + expiry + user meta)
    inner: Versioned,
    /// Marks a deletion; a tombstone hides every older version
    tombstone: bool,
}

impl StoredValue {
    /// Create a new stored value
    pub fn new(value: Vec<u8>, version: u64, expires_at: u64, user_meta: u8) -> Self {
        StoredValue {
            inner: Versioned {
                value,
                version,
                expires_at,
                user_meta,
            },
            tombstone: false,
        }
    }

    /// Create a deletion marker
    pub fn tombstone(version: u64) -> Self {
        StoredValue {
            inner: Versioned::new(Vec::new(), version),
            tombstone: true,
        }
    }

    /// Get the inner Versioned
    #[inline]
    pub fn versioned(&self) -> &Versioned {
        &self.inner
    }

    /// Consume and return the inner Versioned
    #[inline]
    pub fn into_versioned(self) -> Versioned {
        self.inner
    }

    /// Get the value bytes
    #[inline]
    pub fn value(&self) -> &[u8] {
        &self.inner.value
    }

    /// Get the version
    #[inline]
    pub fn version(&self) -> u64 {
        self.inner.version
    }

    /// Get the absolute expiry (0 = never)
    #[inline]
    pub fn expires_at(&self) -> u64 {
        self.inner.expires_at
    }

    /// Get the user meta byte
    #[inline]
    pub fn user_meta(&self) -> u8 {
        self.inner.user_meta
    }

    /// Check if this version is a deletion marker
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.tombstone
    }

    /// Check if this version has expired at `now` (unix seconds)
    #[inline]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.inner.is_expired_at(now)
    }

    /// Deleted or expired at `now`
    #[inline]
    pub fn is_deleted_or_expired(&self, now: u64) -> bool {
        self.tombstone || self.is_expired_at(now)
    }
}

impl From<StoredValue> for Versioned {
    fn from(sv: StoredValue) -> Self {
        sv.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_value_new() {
        let sv = StoredValue::new(b"100".to_vec(), 1, 0, 7);
        assert_eq!(sv.value(), b"100");
        assert_eq!(sv.version(), 1);
        assert_eq!(sv.user_meta(), 7);
        assert!(!sv.is_tombstone());
        assert!(!sv.is_deleted_or_expired(u64::MAX));
    }

    #[test]
    fn test_stored_value_expired() {
        let sv = StoredValue::new(b"x".to_vec(), 1, 100, 0);
        assert!(!sv.is_expired_at(99));
        assert!(sv.is_expired_at(100));
        assert!(sv.is_deleted_or_expired(100));
    }

    #[test]
    fn test_tombstone() {
        let sv = StoredValue::tombstone(9);
        assert!(sv.is_tombstone());
        assert!(sv.is_deleted_or_expired(0));
        assert_eq!(sv.version(), 9);
        assert!(sv.value().is_empty());
    }

    #[test]
    fn test_stored_value_into_versioned() {
        let sv = StoredValue::new(b"v".to_vec(), 5, 42, 1);
        let v: Versioned = sv.into();
        assert_eq!(v.value, b"v".to_vec());
        assert_eq!(v.version, 5);
        assert_eq!(v.expires_at, 42);
        assert_eq!(v.user_meta, 1);
    }
}
