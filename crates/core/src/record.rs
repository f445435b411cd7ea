//! Snapshot records and the export document
//!
//! ## Wire Format
//!
//! The export document keeps the protobuf-JSON layout consumers of the
//! telemetry service already parse:
//!
//! ```text
//! {
//!   "kv": [
//!     {
//!       "key": "dEhvbWU=",
//!       "value": "",
//!       "user_meta": "AA==",
//!       "version": "12",
//!       "expires_at": "0"
//!     }
//!   ]
//! }
//! ```
//!
//! - byte fields are standard base64
//! - 64-bit integers are decimal strings
//! - `user_meta` is a one-byte bytes field

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// One key's most recent live version, as exported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Key bytes
    #[serde(with = "b64")]
    pub key: Vec<u8>,
    /// Normalized value bytes (empty if the stored value could not be decoded)
    #[serde(with = "b64")]
    pub value: Vec<u8>,
    /// One byte of caller-defined flags
    #[serde(with = "meta_b64")]
    pub user_meta: u8,
    /// Version of the exported entry
    #[serde(with = "u64_string")]
    pub version: u64,
    /// Absolute expiry in unix seconds (0 = never)
    #[serde(with = "u64_string")]
    pub expires_at: u64,
}

impl SnapshotRecord {
    /// Key as UTF-8, replacing invalid sequences
    pub fn key_lossy(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

/// The structured document returned by a prefix export
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    /// Records in key order
    #[serde(default)]
    pub kv: Vec<SnapshotRecord>,
}

impl SnapshotDocument {
    /// Wrap records
    pub fn new(kv: Vec<SnapshotRecord>) -> Self {
        SnapshotDocument { kv }
    }

    /// Render as indented JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::from)
    }

    /// Parse a rendered document
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(Error::from)
    }
}

mod b64 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

mod meta_b64 {
    use super::*;

    pub fn serialize<S: Serializer>(meta: &u8, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode([*meta]))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u8, D::Error> {
        let s = String::deserialize(d)?;
        let bytes = STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)?;
        Ok(bytes.first().copied().unwrap_or(0))
    }
}

mod u64_string {
    use super::*;

    pub fn serialize<S: Serializer>(n: &u64, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&n.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SnapshotRecord {
        SnapshotRecord {
            key: b"tHome".to_vec(),
            value: b"{}".to_vec(),
            user_meta: 0,
            version: 12,
            expires_at: 0,
        }
    }

    #[test]
    fn test_record_wire_shape() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["key"], "dEhvbWU=");
        assert_eq!(json["value"], "e30=");
        assert_eq!(json["user_meta"], "AA==");
        assert_eq!(json["version"], "12");
        assert_eq!(json["expires_at"], "0");
    }

    #[test]
    fn test_empty_document_emits_empty_list() {
        let text = SnapshotDocument::default().to_json_pretty().unwrap();
        assert!(text.contains("\"kv\": []"));
    }

    #[test]
    fn test_document_parses_back() {
        let doc = SnapshotDocument::new(vec![record()]);
        let text = doc.to_json_pretty().unwrap();
        assert!(text.starts_with("{\n  \"kv\""));
        assert_eq!(SnapshotDocument::from_json(text.as_bytes()).unwrap(), doc);
    }

    #[test]
    fn test_bad_version_string_is_rejected() {
        let text = r#"{"kv":[{"key":"","value":"","user_meta":"","version":"x","expires_at":"0"}]}"#;
        assert!(SnapshotDocument::from_json(text.as_bytes()).is_err());
    }
}
