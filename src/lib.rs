//! Hearth - configuration and secrets store for a home telemetry service
//!
//! Keys resolve through an override/default scheme, a `secret:` namespace is
//! walled off from the general API, prefixes export as consistent snapshots,
//! and secret payloads can be handed to a container orchestrator instead of
//! being stored locally.
//!
//! # Quick Start
//!
//! ```ignore
//! use hearth::{open_service, HearthConfig};
//!
//! let service = open_service(&HearthConfig::default())?;
//! service.assign_general(b"tHomeRadiusFt", b"150", Default::default())?;
//! let resolved = service.resolve_general(b"tHomeRadiusFt")?;
//! ```
//!
//! # Architecture
//!
//! - `hearth_core`: keys, values, errors, export records
//! - `hearth_storage`: versioned store, value log, GC
//! - `hearth_engine`: resolver, exporter, provisioning, config
//! - `hearth_api`: HTTP surface

use std::sync::Arc;

use tracing::info;

pub use hearth_api::{handle, ApiRequest, ApiResponse, HttpServer};
pub use hearth_core::{Error, Key, Result, SnapshotDocument, SnapshotRecord, Versioned, WriteOptions};
pub use hearth_engine::{
    build_gateway, HearthConfig, ProvisioningBackend, Resolution, SecretAssignment, SeedMode,
    Service,
};
pub use hearth_storage::{Store, StoreOptions, ValueLogGc};

/// Store options for `config`: persistent when `data_dir` is set
pub fn store_options(config: &HearthConfig) -> StoreOptions {
    match &config.data_dir {
        Some(dir) => StoreOptions::persistent(dir).with_sync_writes(config.sync_writes),
        None => StoreOptions::in_memory(),
    }
}

/// Open the store, connect the gateway and seed defaults
pub fn open_service(config: &HearthConfig) -> Result<Arc<Service>> {
    config.validate()?;
    let store = Arc::new(Store::open(store_options(config))?);
    let gateway = build_gateway(&config.provisioning)?;
    let service = Service::new(store, gateway);

    let report = service.seed_defaults(&config.effective_defaults(), config.seed_mode)?;
    info!(
        target: "hearth::daemon",
        data_dir = ?config.data_dir,
        written = report.written,
        kept = report.kept,
        "Service ready"
    );
    Ok(Arc::new(service))
}
