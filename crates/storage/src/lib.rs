//! Storage layer for Hearth
//!
//! This crate implements the embedded multi-version key-value engine:
//! - Store: BTreeMap of version chains under a RwLock, atomic commit counter
//! - VersionChain: newest-first MVCC history per key with pruning
//! - ValueLog: append-only CRC32-framed log replayed on open
//! - Snapshot: pinned read version with lazy prefix scans
//! - ValueLogGc: background value-log garbage collection

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod gc;
pub mod snapshot;
pub mod store;
pub mod stored_value;
pub mod vlog;

pub use chain::{ReadPoint, VersionChain};
pub use gc::{ValueLogGc, DEFAULT_MAX_PASSES};
pub use snapshot::{KeyVersions, Scan, Snapshot};
pub use store::{Store, StoreOptions, StoreStats, LOCK_FILE, VLOG_FILE};
pub use stored_value::StoredValue;
pub use vlog::{LogRecord, LogRewrite, ValueLog, MAX_RECORD_BYTES};
