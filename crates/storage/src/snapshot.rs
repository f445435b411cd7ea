//! Read-only snapshots
//!
//! A `Snapshot` pins a version and a wall-clock instant. Everything read
//! through it reflects the store as of that version: later commits are
//! invisible, and expiry is judged against the pinned instant.
//!
//! # Design Notes
//!
//! - **Lazy**: `scan` walks live storage one key at a time, taking the read
//!   lock only for the duration of each step. A scan never blocks writers
//!   for longer than a single map lookup.
//! - **Pinned**: the snapshot's read point is registered with the store, so
//!   GC keeps every version the snapshot can see until it is dropped.
//! - **Restartable**: every `scan` call starts from the beginning of the
//!   prefix range.

use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use hearth_core::Versioned;

use crate::store::Store;
use crate::stored_value::StoredValue;

/// One key and its versions visible to a snapshot, newest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVersions {
    /// Key bytes
    pub key: Vec<u8>,
    /// Visible versions, newest first (tombstones included)
    pub versions: Vec<StoredValue>,
}

/// A point-in-time view of the store
pub struct Snapshot {
    store: Arc<Store>,
    id: u64,
    version: u64,
    now: u64,
}

impl Snapshot {
    pub(crate) fn new(store: Arc<Store>, id: u64, version: u64, now: u64) -> Self {
        Snapshot {
            store,
            id,
            version,
            now,
        }
    }

    /// The pinned version
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The pinned instant (unix seconds)
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Latest live version of `key` as of this snapshot
    pub fn get(&self, key: &[u8]) -> Option<Versioned> {
        self.store
            .with_chain(key, |chain| {
                chain
                    .latest_live(self.version, self.now)
                    .map(|sv| sv.versioned().clone())
            })
            .flatten()
    }

    /// Iterate the keys starting with `prefix`, in lexicographic order
    pub fn scan(&self, prefix: &[u8]) -> Scan<'_> {
        Scan {
            snapshot: self,
            prefix: prefix.to_vec(),
            cursor: None,
            done: false,
        }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("now", &self.now)
            .finish()
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.store.release_snapshot(self.id);
    }
}

/// Lazy prefix scan over a snapshot
///
/// Yields each key under the prefix with its visible versions. Keys with no
/// version at or below the snapshot version are skipped. Iteration stops at
/// the first key past the prefix range.
pub struct Scan<'a> {
    snapshot: &'a Snapshot,
    prefix: Vec<u8>,
    cursor: Option<Vec<u8>>,
    done: bool,
}

impl Iterator for Scan<'_> {
    type Item = KeyVersions;

    fn next(&mut self) -> Option<KeyVersions> {
        while !self.done {
            let lower = match self.cursor.as_deref() {
                Some(key) => Bound::Excluded(key),
                None => Bound::Included(self.prefix.as_slice()),
            };
            let prefix = self.prefix.as_slice();
            let version = self.snapshot.version;

            let step = self.snapshot.store.with_next_chain(lower, |key, chain| {
                if !key.starts_with(prefix) {
                    return None;
                }
                let versions: Vec<StoredValue> = chain.visible_at(version).cloned().collect();
                Some((key.to_vec(), versions))
            });

            match step.flatten() {
                Some((key, versions)) => {
                    self.cursor = Some(key.clone());
                    if !versions.is_empty() {
                        return Some(KeyVersions { key, versions });
                    }
                }
                None => self.done = true,
            }
        }
        None
    }
}
