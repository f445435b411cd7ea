//! Prefix snapshot export
//!
//! Exports every key under a prefix, as of a single snapshot, with its most
//! recent live version. Values are normalized through `TelemetryState`.
//!
//! # Design Notes
//!
//! - One snapshot per export: every record reflects the same version and
//!   the same instant, however long the scan takes.
//! - Per key, versions are walked newest first. Expired versions are
//!   skipped so an older live version is exported instead. A tombstone ends
//!   the walk: a deleted key is not exported.
//! - Secret keys are never exported. A prefix that can only match secret
//!   keys is refused; a shorter prefix has them left out.

use std::sync::Arc;

use tracing::{debug, info, warn};

use hearth_core::{
    is_secret_key, prefix_scope, Error, PrefixScope, Result, SnapshotDocument, SnapshotRecord,
    TelemetryState,
};
use hearth_storage::{KeyVersions, Store, StoredValue};

/// Snapshot exporter over a shared store
#[derive(Debug, Clone)]
pub struct SnapshotExporter {
    store: Arc<Store>,
}

impl SnapshotExporter {
    /// Create an exporter
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Export the keys under `prefix`, in key order
    pub fn export(&self, prefix: &[u8]) -> Result<Vec<SnapshotRecord>> {
        let scope = prefix_scope(prefix);
        if scope == PrefixScope::Forbidden {
            warn!(
                target: "hearth::export",
                prefix = %String::from_utf8_lossy(prefix),
                "Export of secret namespace refused"
            );
            return Err(Error::forbidden(
                String::from_utf8_lossy(prefix),
                "secret keys cannot be exported",
            ));
        }

        let snapshot = self.store.snapshot()?;
        let now = snapshot.now();
        let mut records = Vec::new();
        let mut redacted = 0usize;

        for entry in snapshot.scan(prefix) {
            if scope == PrefixScope::Redacted && is_secret_key(&entry.key) {
                redacted += 1;
                continue;
            }
            if let Some(record) = export_entry(entry, now) {
                records.push(record);
            }
        }

        info!(
            target: "hearth::export",
            prefix = %String::from_utf8_lossy(prefix),
            version = snapshot.version(),
            records = records.len(),
            redacted,
            "Prefix exported"
        );
        Ok(records)
    }

    /// Export the keys under `prefix` as a document
    pub fn export_document(&self, prefix: &[u8]) -> Result<SnapshotDocument> {
        self.export(prefix).map(SnapshotDocument::new)
    }
}

/// The newest live version, unless a tombstone comes first
fn first_live(versions: &[StoredValue], now: u64) -> Option<&StoredValue> {
    for sv in versions {
        if sv.is_tombstone() {
            return None;
        }
        if sv.is_expired_at(now) {
            continue;
        }
        return Some(sv);
    }
    None
}

fn export_entry(entry: KeyVersions, now: u64) -> Option<SnapshotRecord> {
    let sv = first_live(&entry.versions, now)?;
    let value = match TelemetryState::normalize(sv.value()) {
        Some(normalized) => normalized,
        None => {
            debug!(
                target: "hearth::export",
                key = %String::from_utf8_lossy(&entry.key),
                version = sv.version(),
                "Value is not a telemetry state; exporting empty value"
            );
            Vec::new()
        }
    };
    Some(SnapshotRecord {
        key: entry.key,
        value,
        user_meta: sv.user_meta(),
        version: sv.version(),
        expires_at: sv.expires_at(),
    })
}
