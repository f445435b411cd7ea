//! Keys and namespaces
//!
//! Keys are opaque byte strings. The key space is split into namespaces by a
//! literal string prefix; this module is the only place that knows those
//! prefixes, so every membership test in the workspace goes through it.
//!
//! ## Namespaces
//!
//! - `secret:<name>`: sensitive values. Only reachable through the secret-scoped
//!   entry points, never through general lookups or bulk exports.
//! - `default:<key>`: seeded fallback values, written at startup only.
//! - anything else: general configuration.
//!
//! The storage engine has no notion of namespaces; they are enforced at the
//! resolver and exporter boundary.

use std::fmt;

use thiserror::Error;

/// Prefix marking the sensitive namespace
pub const SECRET_PREFIX: &str = "secret:";

/// Prefix under which seeded defaults are stored
pub const DEFAULT_PREFIX: &str = "default:";

/// Prefix of a value that points at a secret held by the orchestrator
pub const SECRET_REF_PREFIX: &str = "docker-secret:";

/// Maximum key length in bytes
pub const MAX_KEY_BYTES: usize = 1024;

/// Namespace a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// General configuration keys
    General,
    /// `secret:` keys
    Secret,
    /// `default:` keys
    Default,
}

impl Namespace {
    /// Classify raw key bytes
    pub fn of(key: &[u8]) -> Self {
        if key.starts_with(SECRET_PREFIX.as_bytes()) {
            Namespace::Secret
        } else if key.starts_with(DEFAULT_PREFIX.as_bytes()) {
            Namespace::Default
        } else {
            Namespace::General
        }
    }
}

/// Returns true if `key` lies in the secret namespace
#[inline]
pub fn is_secret_key(key: &[u8]) -> bool {
    Namespace::of(key) == Namespace::Secret
}

/// How a range scan over `prefix` relates to the secret namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixScope {
    /// The range cannot contain secret keys
    Open,
    /// The range spans the secret namespace (e.g. `""` or `"sec"`);
    /// secret keys must be dropped from results
    Redacted,
    /// The prefix is the secret namespace or nested under it
    Forbidden,
}

/// Classify a scan prefix
pub fn prefix_scope(prefix: &[u8]) -> PrefixScope {
    let secret = SECRET_PREFIX.as_bytes();
    if prefix.starts_with(secret) {
        PrefixScope::Forbidden
    } else if secret.starts_with(prefix) {
        PrefixScope::Redacted
    } else {
        PrefixScope::Open
    }
}

/// Build the reference token stored in place of an external secret
pub fn secret_reference(external_id: &str) -> String {
    format!("{}{}", SECRET_REF_PREFIX, external_id)
}

/// Extract the external id from a reference token, if `value` is one
pub fn parse_secret_reference(value: &[u8]) -> Option<&str> {
    let rest = value.strip_prefix(SECRET_REF_PREFIX.as_bytes())?;
    let id = std::str::from_utf8(rest).ok()?;
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Validate raw key bytes
pub fn validate_key(key: &[u8]) -> Result<(), KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(KeyError::TooLong {
            actual: key.len(),
            max: MAX_KEY_BYTES,
        });
    }
    Ok(())
}

/// Key validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// Key is empty (length 0)
    #[error("Key cannot be empty")]
    Empty,

    /// Key exceeds maximum length
    #[error("Key too long: {actual} bytes exceeds maximum {max}")]
    TooLong {
        /// Actual key length in bytes
        actual: usize,
        /// Maximum allowed length
        max: usize,
    },
}

/// A store key
///
/// Ordering is plain lexicographic byte order, which is the iteration order
/// of the storage engine.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Vec<u8>);

impl Key {
    /// Wrap raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Key(bytes.into())
    }

    /// Key in the secret namespace for a logical secret name
    pub fn secret(name: &str) -> Self {
        Key(format!("{}{}", SECRET_PREFIX, name).into_bytes())
    }

    /// The `default:` companion of this key
    pub fn default_for(&self) -> Self {
        let mut bytes = Vec::with_capacity(DEFAULT_PREFIX.len() + self.0.len());
        bytes.extend_from_slice(DEFAULT_PREFIX.as_bytes());
        bytes.extend_from_slice(&self.0);
        Key(bytes)
    }

    /// Namespace this key belongs to
    #[inline]
    pub fn namespace(&self) -> Namespace {
        Namespace::of(&self.0)
    }

    /// Shorthand for `namespace() == Namespace::Secret`
    #[inline]
    pub fn is_secret(&self) -> bool {
        self.namespace() == Namespace::Secret
    }

    /// Logical secret name, if this is a secret key
    pub fn secret_name(&self) -> Option<String> {
        self.0
            .strip_prefix(SECRET_PREFIX.as_bytes())
            .map(|name| String::from_utf8_lossy(name).into_owned())
    }

    /// Validate length rules
    pub fn validate(&self) -> Result<(), KeyError> {
        validate_key(&self.0)
    }

    /// Raw bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into raw bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(s.into_bytes())
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Key(bytes)
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // === Namespaces ===

    #[test]
    fn test_namespace_classification() {
        assert_eq!(Namespace::of(b"secret:apiToken"), Namespace::Secret);
        assert_eq!(Namespace::of(b"default:tHome"), Namespace::Default);
        assert_eq!(Namespace::of(b"tHome"), Namespace::General);
    }

    #[test]
    fn test_secret_lookalikes_are_general() {
        // Membership is decided by the exact prefix, colon included
        assert_eq!(Namespace::of(b"secretThing"), Namespace::General);
        assert_eq!(Namespace::of(b"SECRET:x"), Namespace::General);
        assert_eq!(Namespace::of(b" secret:x"), Namespace::General);
    }

    #[test]
    fn test_bare_secret_prefix_is_secret() {
        assert!(is_secret_key(b"secret:"));
    }

    #[test]
    fn test_default_for() {
        let key = Key::from("tHomeRadiusFt");
        assert_eq!(key.default_for().as_bytes(), b"default:tHomeRadiusFt");
        assert_eq!(key.default_for().namespace(), Namespace::Default);
    }

    #[test]
    fn test_secret_key_and_name() {
        let key = Key::secret("apiToken");
        assert!(key.is_secret());
        assert_eq!(key.to_string(), "secret:apiToken");
        assert_eq!(key.secret_name().as_deref(), Some("apiToken"));
        assert_eq!(Key::from("apiToken").secret_name(), None);
    }

    // === Prefix scopes ===

    #[test]
    fn test_prefix_scope() {
        assert_eq!(prefix_scope(b"secret:"), PrefixScope::Forbidden);
        assert_eq!(prefix_scope(b"secret:api"), PrefixScope::Forbidden);
        assert_eq!(prefix_scope(b""), PrefixScope::Redacted);
        assert_eq!(prefix_scope(b"s"), PrefixScope::Redacted);
        assert_eq!(prefix_scope(b"secret"), PrefixScope::Redacted);
        assert_eq!(prefix_scope(b"t"), PrefixScope::Open);
        assert_eq!(prefix_scope(b"secretThing"), PrefixScope::Open);
        assert_eq!(prefix_scope(b"default:"), PrefixScope::Open);
    }

    // === Reference tokens ===

    #[test]
    fn test_secret_reference_round_trip() {
        let token = secret_reference("k2j3h4");
        assert_eq!(token, "docker-secret:k2j3h4");
        assert_eq!(parse_secret_reference(token.as_bytes()), Some("k2j3h4"));
    }

    #[test]
    fn test_parse_secret_reference_rejects_plain_values() {
        assert_eq!(parse_secret_reference(b"abcdef"), None);
        assert_eq!(parse_secret_reference(b"docker-secret:"), None);
        assert_eq!(parse_secret_reference(b"docker-secret:\xff"), None);
    }

    // === Validation ===

    #[test]
    fn test_validate_key() {
        assert!(validate_key(b"tHome").is_ok());
        assert_eq!(validate_key(b""), Err(KeyError::Empty));
        assert!(validate_key(&vec![b'x'; MAX_KEY_BYTES]).is_ok());
        assert!(matches!(
            validate_key(&vec![b'x'; MAX_KEY_BYTES + 1]),
            Err(KeyError::TooLong { .. })
        ));
    }

    #[test]
    fn test_key_ordering_is_bytewise() {
        let mut keys = vec![Key::from("tWork"), Key::from("secretThing"), Key::from("tHome")];
        keys.sort();
        let names: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(names, vec!["secretThing", "tHome", "tWork"]);
    }

    // === Properties ===

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_secret_scan_scope(suffix in proptest::collection::vec(any::<u8>(), 0..16)) {
            let mut key = SECRET_PREFIX.as_bytes().to_vec();
            key.extend_from_slice(&suffix);
            prop_assert!(is_secret_key(&key));
            prop_assert_eq!(prefix_scope(&key), PrefixScope::Forbidden);
        }

        #[test]
        fn prop_secret_key_visible_to_scope(prefix_len in 0usize..7, suffix in "[a-zA-Z]{0,8}") {
            // Any scan that could reach a secret key is at least redacted
            let prefix = &SECRET_PREFIX.as_bytes()[..prefix_len];
            prop_assert_eq!(prefix_scope(prefix), PrefixScope::Redacted);
            let key = format!("{}{}", SECRET_PREFIX, suffix);
            prop_assert!(key.as_bytes().starts_with(prefix));
        }

        #[test]
        fn prop_reference_token_round_trip(id in "[a-z0-9]{1,32}") {
            let token = secret_reference(&id);
            prop_assert_eq!(parse_secret_reference(token.as_bytes()), Some(id.as_str()));
        }
    }
}
