//! Store: the multi-version key-value engine
//!
//! This module provides `Store`, built from:
//! - `BTreeMap<Vec<u8>, VersionChain>` for ordered, multi-version key storage
//! - `parking_lot::RwLock` for thread-safe access
//! - `AtomicU64` for the store-wide commit counter
//! - an optional append-only value log for persistence
//!
//! # Design Notes
//!
//! - **Commit lock**: the value-log mutex serializes commits in both modes.
//!   A commit appends to the log, inserts into the map and publishes its
//!   version while holding it, so a published version is always durable
//!   and visible.
//! - **Read points**: snapshots register `(version, now)` so GC never prunes
//!   a version a live snapshot can still see.
//! - **GC outside locks**: the value-log rewrite is built from short read
//!   locks and swapped in under the commit lock after copying the tail
//!   appended meanwhile.
//! - **Exclusive directory**: a `.lock` file held with `fs2` keeps a second
//!   process out of the same directory.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use hearth_core::{expiry_from_ttl, unix_now, validate_key, Error, Result, Versioned, WriteOptions};

use crate::chain::{ReadPoint, VersionChain};
use crate::snapshot::Snapshot;
use crate::stored_value::StoredValue;
use crate::vlog::{LogRecord, LogRewrite, ValueLog};

/// File name of the value log inside the store directory
pub const VLOG_FILE: &str = "hearth.vlog";

/// File name of the process lock inside the store directory
pub const LOCK_FILE: &str = ".lock";

/// Keys handled per write-lock acquisition while pruning
const PRUNE_BATCH: usize = 256;

/// Keys copied per read-lock acquisition while rewriting the value log
const REWRITE_BATCH: usize = 256;

/// How to open a store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Store directory; `None` keeps everything in memory
    pub dir: Option<PathBuf>,
    /// fsync the value log on every commit
    pub sync_writes: bool,
}

impl StoreOptions {
    /// An in-memory store (no value log, no lock file)
    pub fn in_memory() -> Self {
        StoreOptions {
            dir: None,
            sync_writes: false,
        }
    }

    /// A persistent store in `dir`, syncing every commit
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        StoreOptions {
            dir: Some(dir.into()),
            sync_writes: true,
        }
    }

    /// Override commit syncing
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of keys with at least one version in memory
    pub keys: usize,
    /// Number of versions held in memory across all keys
    pub versions: usize,
    /// Number of records in the value log (0 in memory)
    pub log_records: u64,
    /// Value log size in bytes (0 in memory)
    pub log_bytes: u64,
    /// Latest published version
    pub current_version: u64,
    /// Snapshots currently open
    pub active_snapshots: usize,
}

/// Open snapshots and their read points
#[derive(Debug, Default)]
struct ReaderRegistry {
    next_id: u64,
    points: BTreeMap<u64, ReadPoint>,
}

/// The multi-version key-value store
///
/// Thread-safe; share it as `Arc<Store>`. Every operation after `close`
/// returns `Error::Closed`.
#[derive(Debug)]
pub struct Store {
    /// Ordered map of key → version chain
    data: RwLock<BTreeMap<Vec<u8>, VersionChain>>,
    /// Latest published version
    version: AtomicU64,
    /// Value log; its mutex is the commit lock
    log: Mutex<Option<ValueLog>>,
    /// Registered snapshot read points
    readers: Mutex<ReaderRegistry>,
    /// Only one GC pass at a time
    gc_lock: Mutex<()>,
    /// Set once by `close`
    closed: AtomicBool,
    /// Held exclusively for the lifetime of a persistent store
    lock_file: Mutex<Option<File>>,
    /// Store directory (None for in-memory)
    dir: Option<PathBuf>,
}

impl Store {
    /// Open a store
    ///
    /// For a persistent store this creates the directory if needed, takes
    /// the exclusive lock and replays the value log.
    pub fn open(options: StoreOptions) -> Result<Self> {
        let dir = match options.dir {
            None => return Ok(Self::empty(None, None, None)),
            Some(dir) => dir,
        };

        fs::create_dir_all(&dir)?;
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(dir.join(LOCK_FILE))
            .map_err(|e| Error::store(format!("failed to open lock file: {}", e)))?;
        lock_file.try_lock_exclusive().map_err(|_| {
            Error::store(format!(
                "store at '{}' is already in use by another process",
                dir.display()
            ))
        })?;

        let (log, records) = ValueLog::open(&dir.join(VLOG_FILE), options.sync_writes)?;
        let replayed = records.len();
        let store = Self::empty(Some(dir), Some(log), Some(lock_file));
        let final_version = store.replay(records);

        info!(
            target: "hearth::storage",
            dir = ?store.dir,
            records = replayed,
            final_version,
            "Store opened"
        );
        Ok(store)
    }

    /// Open an in-memory store
    pub fn in_memory() -> Self {
        Self::empty(None, None, None)
    }

    fn empty(dir: Option<PathBuf>, log: Option<ValueLog>, lock_file: Option<File>) -> Self {
        Store {
            data: RwLock::new(BTreeMap::new()),
            version: AtomicU64::new(0),
            log: Mutex::new(log),
            readers: Mutex::new(ReaderRegistry::default()),
            gc_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            lock_file: Mutex::new(lock_file),
            dir,
        }
    }

    /// Rebuild chains from replayed records; returns the highest version seen
    fn replay(&self, records: Vec<LogRecord>) -> u64 {
        let mut data = self.data.write();
        let mut max_version = 0;
        for record in records {
            max_version = max_version.max(record.value.version());
            data.entry(record.key).or_default().insert(record.value);
        }
        // Chains holding only tombstones (or version marks) carry nothing readable
        data.retain(|_, chain| chain.iter().any(|sv| !sv.is_tombstone()));
        self.version.store(max_version, Ordering::Release);
        max_version
    }

    /// Store directory, if persistent
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Latest published version
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// True after `close`
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Write `value` under `key`; returns the new version
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<u64> {
        self.put_with(key, value, WriteOptions::default())
    }

    /// Write `value` under `key` with expiry and user meta
    ///
    /// The record is in the value log before it becomes visible. On failure
    /// nothing changes.
    pub fn put_with(&self, key: &[u8], value: &[u8], options: WriteOptions) -> Result<u64> {
        validate_key(key)?;
        let expires_at = expiry_from_ttl(options.ttl, unix_now());
        self.commit(key, |version| {
            StoredValue::new(value.to_vec(), version, expires_at, options.user_meta)
        })
    }

    /// Write a tombstone for `key`; returns the new version
    pub fn delete(&self, key: &[u8]) -> Result<u64> {
        validate_key(key)?;
        self.commit(key, StoredValue::tombstone)
    }

    fn commit(&self, key: &[u8], make: impl FnOnce(u64) -> StoredValue) -> Result<u64> {
        self.ensure_open()?;
        let mut log = self.log.lock();
        // close() takes the commit lock after setting the flag
        self.ensure_open()?;

        let version = self.version.load(Ordering::Acquire) + 1;
        let record = LogRecord::new(key.to_vec(), make(version));
        if let Some(log) = log.as_mut() {
            log.append(&record)?;
        }

        let mut data = self.data.write();
        match data.get_mut(key) {
            Some(chain) => chain.push(record.value),
            None => {
                data.insert(record.key, VersionChain::new(record.value));
            }
        }
        self.version.store(version, Ordering::Release);
        Ok(version)
    }

    /// Latest live version of `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Versioned>> {
        self.ensure_open()?;
        let now = unix_now();
        let data = self.data.read();
        // Loaded under the read lock so pruning cannot run in between
        let version = self.current_version();
        Ok(data
            .get(key)
            .and_then(|chain| chain.latest_live(version, now))
            .map(|sv| sv.versioned().clone()))
    }

    /// Open a read-only snapshot at the current version and instant
    pub fn snapshot(self: &Arc<Self>) -> Result<Snapshot> {
        self.ensure_open()?;
        let mut readers = self.readers.lock();
        let point = ReadPoint {
            version: self.current_version(),
            now: unix_now(),
            open_ended: false,
        };
        readers.next_id += 1;
        let id = readers.next_id;
        readers.points.insert(id, point);
        drop(readers);
        Ok(Snapshot::new(Arc::clone(self), id, point.version, point.now))
    }

    pub(crate) fn release_snapshot(&self, id: u64) {
        self.readers.lock().points.remove(&id);
    }

    /// Run `f` over the first chain within `lower..`
    ///
    /// Used by snapshot iteration to walk the map one key at a time without
    /// holding the read lock between steps.
    pub(crate) fn with_next_chain<R>(
        &self,
        lower: Bound<&[u8]>,
        f: impl FnOnce(&[u8], &VersionChain) -> R,
    ) -> Option<R> {
        let data = self.data.read();
        data.range::<[u8], _>((lower, Bound::Unbounded))
            .next()
            .map(|(key, chain)| f(key, chain))
    }

    pub(crate) fn with_chain<R>(&self, key: &[u8], f: impl FnOnce(&VersionChain) -> R) -> Option<R> {
        self.data.read().get(key).map(f)
    }

    /// Current counters
    pub fn stats(&self) -> StoreStats {
        let (keys, versions) = {
            let data = self.data.read();
            (
                data.len(),
                data.values().map(VersionChain::version_count).sum(),
            )
        };
        let (log_records, log_bytes) = self
            .log
            .lock()
            .as_ref()
            .map_or((0, 0), |log| (log.records(), log.len()));
        StoreStats {
            keys,
            versions,
            log_records,
            log_bytes,
            current_version: self.current_version(),
            active_snapshots: self.readers.lock().points.len(),
        }
    }

    /// Run one garbage-collection pass
    ///
    /// Prunes version chains, then rewrites the value log if at least
    /// `discard_ratio` of its records are stale. Returns `true` when the log
    /// was rewritten (more work may remain), `false` when there was nothing
    /// to do or another pass is already running.
    pub fn run_gc(&self, discard_ratio: f64) -> Result<bool> {
        self.ensure_open()?;
        let _gc = match self.gc_lock.try_lock() {
            Some(guard) => guard,
            None => return Ok(false),
        };

        let (points, horizon) = self.collect_read_points();
        let pruned = self.prune_versions(&points, horizon);
        if pruned > 0 {
            debug!(target: "hearth::gc", pruned, horizon, "Pruned unreachable versions");
        }

        let (records, in_memory) = {
            let log = self.log.lock();
            match log.as_ref() {
                Some(log) => (log.records(), self.stats_versions()),
                None => return Ok(false),
            }
        };
        if records == 0 {
            return Ok(false);
        }
        let stale = records.saturating_sub(in_memory as u64);
        let ratio = stale as f64 / records as f64;
        if ratio < discard_ratio || stale == 0 {
            return Ok(false);
        }

        self.rewrite_log()?;
        info!(
            target: "hearth::gc",
            stale,
            records,
            ratio,
            "Value log rewritten"
        );
        Ok(true)
    }

    fn stats_versions(&self) -> usize {
        self.data
            .read()
            .values()
            .map(VersionChain::version_count)
            .sum()
    }

    /// Snapshot read points plus a point for every future reader
    fn collect_read_points(&self) -> (Vec<ReadPoint>, u64) {
        let readers = self.readers.lock();
        let horizon = self.current_version();
        let mut points: Vec<ReadPoint> = readers.points.values().copied().collect();
        points.push(ReadPoint {
            version: horizon,
            now: unix_now(),
            open_ended: true,
        });
        (points, horizon)
    }

    fn prune_versions(&self, points: &[ReadPoint], horizon: u64) -> usize {
        let mut removed = 0;
        let mut cursor: Option<Vec<u8>> = None;
        loop {
            let mut data = self.data.write();
            let lower = match cursor.as_deref() {
                Some(key) => Bound::Excluded(key),
                None => Bound::Unbounded,
            };
            let mut emptied = Vec::new();
            let mut last = None;
            let mut seen = 0;
            for (key, chain) in data
                .range_mut::<[u8], _>((lower, Bound::Unbounded))
                .take(PRUNE_BATCH)
            {
                removed += chain.prune(points, horizon);
                if chain.is_empty() {
                    emptied.push(key.clone());
                }
                last = Some(key.clone());
                seen += 1;
            }
            for key in emptied {
                data.remove(&key);
            }
            drop(data);

            match last {
                Some(key) if seen == PRUNE_BATCH => cursor = Some(key),
                _ => break,
            }
        }
        removed
    }

    fn rewrite_log(&self) -> Result<()> {
        let (offset, upto, path) = {
            let log = self.log.lock();
            match log.as_ref() {
                Some(log) => (log.len(), self.current_version(), log.rewrite_path()),
                None => return Err(Error::Closed),
            }
        };

        let mut rewrite = LogRewrite::create(path)?;
        if let Err(e) = self.copy_live_versions(&mut rewrite, upto) {
            rewrite.discard();
            return Err(e);
        }

        let mut log = self.log.lock();
        let log = match log.as_mut() {
            Some(log) => log,
            None => {
                rewrite.discard();
                return Err(Error::Closed);
            }
        };
        let tail = match log.tail_from(offset) {
            Ok(tail) => tail,
            Err(e) => {
                rewrite.discard();
                return Err(e);
            }
        };
        if let Err(e) = rewrite.write_raw(&tail) {
            rewrite.discard();
            return Err(e);
        }
        log.install(rewrite)
    }

    /// Write every in-memory version `<= upto`, oldest first per key
    fn copy_live_versions(&self, rewrite: &mut LogRewrite, upto: u64) -> Result<()> {
        let mut cursor: Option<Vec<u8>> = None;
        let mut highest = 0;
        loop {
            let mut batch = Vec::new();
            let mut seen = 0;
            {
                let data = self.data.read();
                let lower = match cursor.as_deref() {
                    Some(key) => Bound::Excluded(key),
                    None => Bound::Unbounded,
                };
                for (key, chain) in data
                    .range::<[u8], _>((lower, Bound::Unbounded))
                    .take(REWRITE_BATCH)
                {
                    for sv in chain.iter().rev().filter(|sv| sv.version() <= upto) {
                        batch.push(LogRecord::new(key.clone(), sv.clone()));
                    }
                    cursor = Some(key.clone());
                    seen += 1;
                }
            }
            for record in &batch {
                highest = highest.max(record.value.version());
                rewrite.write(record)?;
            }
            if seen < REWRITE_BATCH {
                break;
            }
        }
        if highest < upto {
            rewrite.write(&LogRecord::version_mark(upto))?;
        }
        Ok(())
    }

    /// Close the store
    ///
    /// Syncs and releases the value log and the directory lock. Idempotent:
    /// only the first call does anything.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let synced = match self.log.lock().take() {
            Some(mut log) => log.sync(),
            None => Ok(()),
        };
        if let Some(lock_file) = self.lock_file.lock().take() {
            if let Err(e) = lock_file.unlock() {
                warn!(target: "hearth::storage", error = %e, "Failed to release store lock");
            }
        }

        info!(target: "hearth::storage", dir = ?self.dir, "Store closed");
        synced
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Some(log) = self.log.get_mut().as_mut() {
            let _ = log.sync();
        }
    }
}
