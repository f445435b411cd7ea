//! Version chains for MVCC
//!
//! Every key maps to a chain of versions stored newest-first, so a read at a
//! given version scans from the front until it finds one `<= max_version`.
//!
//! # Visibility
//!
//! A reader at `(max_version, now)` walks the chain newest-first:
//! - versions newer than `max_version` are invisible
//! - a tombstone ends the walk (the key is deleted)
//! - a version expired at `now` is skipped
//! - the first remaining version is the visible one
//!
//! # Pruning
//!
//! `prune` drops versions no reader can reach any more. See [`ReadPoint`].

use std::collections::VecDeque;

use crate::stored_value::StoredValue;

/// A position some reader may read from
///
/// Active snapshots have a fixed `now`, so the first live version they meet
/// is all they will ever see. Future readers (`open_ended`) read at later
/// instants, so a version that is live now but carries an expiry does not
/// shadow older versions for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPoint {
    /// Highest version visible to the reader
    pub version: u64,
    /// Wall-clock instant (unix seconds) used for expiry checks
    pub now: u64,
    /// True for the reader standing in for all future reads
    pub open_ended: bool,
}

/// Version chain for one key, newest first
#[derive(Debug, Clone, Default)]
pub struct VersionChain {
    /// VecDeque gives O(1) push_front for new versions
    versions: VecDeque<StoredValue>,
}

impl VersionChain {
    /// Create a new version chain with a single version
    pub fn new(value: StoredValue) -> Self {
        let mut versions = VecDeque::with_capacity(4);
        versions.push_front(value);
        Self { versions }
    }

    /// Add a new version (must be newer than existing versions)
    #[inline]
    pub fn push(&mut self, value: StoredValue) {
        debug_assert!(
            self.versions
                .front()
                .map_or(true, |front| front.version() < value.version()),
            "versions must be pushed in increasing order"
        );
        self.versions.push_front(value);
    }

    /// Insert a version at its ordered position
    ///
    /// Used by replay, where records of one key may arrive out of order after
    /// a value-log rewrite. A duplicate version replaces the existing entry.
    pub fn insert(&mut self, value: StoredValue) {
        let version = value.version();
        match self.versions.front() {
            None => self.versions.push_front(value),
            Some(front) if front.version() < version => self.versions.push_front(value),
            _ => {
                let pos = self.versions.iter().position(|sv| sv.version() <= version);
                match pos {
                    Some(i) if self.versions[i].version() == version => self.versions[i] = value,
                    Some(i) => self.versions.insert(i, value),
                    None => self.versions.push_back(value),
                }
            }
        }
    }

    /// Get the latest version, whatever its state
    #[inline]
    pub fn latest(&self) -> Option<&StoredValue> {
        self.versions.front()
    }

    /// Versions visible at `max_version`, newest first
    pub fn visible_at(&self, max_version: u64) -> impl Iterator<Item = &StoredValue> {
        self.versions
            .iter()
            .filter(move |sv| sv.version() <= max_version)
    }

    /// The version a reader at `(max_version, now)` sees
    pub fn latest_live(&self, max_version: u64, now: u64) -> Option<&StoredValue> {
        for sv in self.visible_at(max_version) {
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

    /// Iterate over all versions, newest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &StoredValue> {
        self.versions.iter()
    }

    /// Drop versions no reader can reach
    ///
    /// Versions newer than `horizon` were committed after the read points
    /// were collected and are always kept. Returns the number of versions
    /// removed.
    pub fn prune(&mut self, points: &[ReadPoint], horizon: u64) -> usize {
        let before = self.versions.len();
        let mut keep = vec![false; before];

        for (i, sv) in self.versions.iter().enumerate() {
            if sv.version() > horizon {
                keep[i] = true;
            }
        }

        for point in points {
            for (i, sv) in self.versions.iter().enumerate() {
                if sv.version() > point.version || sv.version() > horizon {
                    continue;
                }
                if sv.is_tombstone() {
                    keep[i] = true;
                    break;
                }
                if sv.is_expired_at(point.now) {
                    continue;
                }
                keep[i] = true;
                if !point.open_ended || sv.expires_at() == 0 {
                    break;
                }
            }
        }

        let mut flags = keep.into_iter();
        self.versions.retain(|_| flags.next().unwrap_or(true));

        // A trailing tombstone has nothing left to hide
        while self
            .versions
            .back()
            .map_or(false, |sv| sv.is_tombstone() && sv.version() <= horizon)
        {
            self.versions.pop_back();
        }

        before - self.versions.len()
    }

    /// Number of versions stored
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    /// Check if the version chain is empty
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
