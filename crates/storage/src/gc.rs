//! Value-log GC background task
//!
//! This module provides `ValueLogGc`, which runs in a background thread and
//! periodically calls `Store::run_gc`.
//!
//! # Design Notes
//!
//! - Each tick runs GC in a bounded loop: while a pass reports it rewrote
//!   the log, run again, up to `max_passes`
//! - Failures are logged and retried on the next tick
//! - Graceful shutdown via atomic flag, checked every 100ms while sleeping

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use hearth_core::Result;

use crate::store::Store;

/// Default number of GC passes per tick
pub const DEFAULT_MAX_PASSES: usize = 16;

/// Background value-log GC task
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use std::time::Duration;
/// use hearth_storage::{Store, ValueLogGc};
///
/// let store = Arc::new(Store::in_memory());
/// let gc = ValueLogGc::new(Arc::clone(&store), Duration::from_secs(3600), 0.7);
/// let handle = gc.start()?;
///
/// // ... use the store ...
///
/// gc.shutdown();
/// handle.join().unwrap();
/// ```
pub struct ValueLogGc {
    /// Store to collect
    store: Arc<Store>,
    /// How long to wait between ticks
    interval: Duration,
    /// Stale-record ratio that triggers a rewrite
    discard_ratio: f64,
    /// Upper bound on passes per tick
    max_passes: usize,
    /// Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl ValueLogGc {
    /// Create a new GC task
    ///
    /// # Arguments
    ///
    /// * `store` - The store to collect
    /// * `interval` - Time between ticks
    /// * `discard_ratio` - Rewrite the log once this share of records is stale
    pub fn new(store: Arc<Store>, interval: Duration, discard_ratio: f64) -> Self {
        Self {
            store,
            interval,
            discard_ratio,
            max_passes: DEFAULT_MAX_PASSES,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the number of passes per tick
    pub fn max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    /// Run one tick: GC until nothing is left or `max_passes` is reached
    ///
    /// Returns the number of passes that rewrote the log.
    pub fn run_once(&self) -> Result<usize> {
        run_tick(&self.store, self.discard_ratio, self.max_passes)
    }

    /// Start the background task
    ///
    /// The thread sleeps first and runs until `shutdown()` is called or the
    /// store is closed.
    pub fn start(&self) -> std::io::Result<JoinHandle<()>> {
        let store = Arc::clone(&self.store);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;
        let discard_ratio = self.discard_ratio;
        let max_passes = self.max_passes;

        thread::Builder::new()
            .name("hearth-vlog-gc".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    let sleep_interval = Duration::from_millis(100).min(interval);
                    let mut elapsed = Duration::ZERO;
                    while elapsed < interval {
                        if shutdown.load(Ordering::Relaxed) {
                            return;
                        }
                        thread::sleep(sleep_interval);
                        elapsed += sleep_interval;
                    }

                    if store.is_closed() {
                        return;
                    }
                    match run_tick(&store, discard_ratio, max_passes) {
                        Ok(rewrites) => {
                            debug!(target: "hearth::gc", rewrites, "GC tick complete")
                        }
                        Err(e) => {
                            warn!(target: "hearth::gc", error = %e, "GC failed; retrying next tick")
                        }
                    }
                }
            })
    }

    /// Signal shutdown
    ///
    /// The background thread exits within one sleep slice.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check if shutdown has been signaled
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_tick(store: &Store, discard_ratio: f64, max_passes: usize) -> Result<usize> {
    let mut rewrites = 0;
    while rewrites < max_passes && store.run_gc(discard_ratio)? {
        rewrites += 1;
    }
    Ok(rewrites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;
    use tempfile::TempDir;

    #[test]
    fn test_gc_creation() {
        let store = Arc::new(Store::in_memory());
        let gc = ValueLogGc::new(Arc::clone(&store), Duration::from_secs(60), 0.7);
        assert!(!gc.is_shutdown());
    }

    #[test]
    fn test_gc_shutdown() {
        let store = Arc::new(Store::in_memory());
        let gc = ValueLogGc::new(Arc::clone(&store), Duration::from_secs(60), 0.7);
        let handle = gc.start().unwrap();
        gc.shutdown();
        assert!(gc.is_shutdown());
        handle.join().unwrap();
    }

    #[test]
    fn test_run_once_stops_when_nothing_left() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(StoreOptions::persistent(dir.path())).unwrap());
        for i in 0..20 {
            store.put(b"k", i.to_string().as_bytes()).unwrap();
        }
        let gc = ValueLogGc::new(Arc::clone(&store), Duration::from_secs(60), 0.5);
        assert_eq!(gc.run_once().unwrap(), 1);
        assert_eq!(gc.run_once().unwrap(), 0);
        assert_eq!(store.stats().log_records, 1);
    }

    #[test]
    fn test_background_gc_compacts_log() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(StoreOptions::persistent(dir.path())).unwrap());
        for i in 0..20 {
            store.put(b"k", i.to_string().as_bytes()).unwrap();
        }

        let gc = ValueLogGc::new(Arc::clone(&store), Duration::from_millis(20), 0.5);
        let handle = gc.start().unwrap();
        let mut compacted = false;
        for _ in 0..100 {
            if store.stats().log_records == 1 {
                compacted = true;
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        gc.shutdown();
        handle.join().unwrap();
        assert!(compacted);
    }

    #[test]
    fn test_worker_exits_after_store_close() {
        let store = Arc::new(Store::in_memory());
        let gc = ValueLogGc::new(Arc::clone(&store), Duration::from_millis(10), 0.5);
        let handle = gc.start().unwrap();
        store.close().unwrap();
        handle.join().unwrap();
    }
}
