//! Service context
//!
//! `Service` bundles the store with the resolver, the exporter and the
//! optional provisioning gateway. It is constructed once and shared (via
//! `Arc`) by every request handler; there are no global handles.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use hearth_core::{
    parse_secret_reference, Error, Key, Result, SnapshotDocument, Versioned, WriteOptions,
    SECRET_PREFIX,
};
use hearth_storage::{Store, StoreStats};

use crate::config::{ProvisioningBackend, ProvisioningConfig};
use crate::defaults::{seed_defaults, SeedMode, SeedReport};
use crate::exporter::SnapshotExporter;
use crate::gateway::{
    DockerOrchestrator, InMemoryOrchestrator, NetworkSummary, Orchestrator, ProvisioningGateway,
    SecretMount, SecretSummary, ServiceSummary, SECRET_MOUNT_DIR,
};
use crate::resolver::{KeyResolver, Resolution, SecretAssignment};

/// Build the gateway a `[provisioning]` section asks for
///
/// Returns `None` for the `none` backend. Connecting to Docker happens here,
/// so an unreachable daemon fails startup.
pub fn build_gateway(config: &ProvisioningConfig) -> Result<Option<Arc<ProvisioningGateway>>> {
    let orchestrator: Arc<dyn Orchestrator> = match config.backend {
        ProvisioningBackend::None => return Ok(None),
        ProvisioningBackend::Memory => Arc::new(InMemoryOrchestrator::new()),
        ProvisioningBackend::Docker => Arc::new(
            DockerOrchestrator::connect(config.label.clone())
                .map_err(|e| Error::provisioning(e.to_string()))?,
        ),
    };
    let gateway =
        ProvisioningGateway::new(orchestrator, config.label.clone()).with_network(config.network.clone());
    info!(target: "hearth::provisioning", gateway = ?gateway, "Provisioning gateway ready");
    Ok(Some(Arc::new(gateway)))
}

/// The operations exposed to request handlers
#[derive(Debug, Clone)]
pub struct Service {
    store: Arc<Store>,
    resolver: KeyResolver,
    exporter: SnapshotExporter,
    gateway: Option<Arc<ProvisioningGateway>>,
}

impl Service {
    /// Create a service over `store`, provisioning through `gateway` if any
    pub fn new(store: Arc<Store>, gateway: Option<Arc<ProvisioningGateway>>) -> Self {
        Service {
            resolver: KeyResolver::new(Arc::clone(&store), gateway.clone()),
            exporter: SnapshotExporter::new(Arc::clone(&store)),
            store,
            gateway,
        }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The provisioning gateway, if configured
    pub fn gateway(&self) -> Option<&Arc<ProvisioningGateway>> {
        self.gateway.as_ref()
    }

    /// Store counters
    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Seed `default:` entries
    pub fn seed_defaults(&self, defaults: &BTreeMap<String, String>, mode: SeedMode) -> Result<SeedReport> {
        seed_defaults(&self.store, defaults, mode)
    }

    // ========================================================================
    // Key operations
    // ========================================================================

    /// Resolve a general key through its override and default tiers
    pub fn resolve_general(&self, key: &[u8]) -> Result<Resolution> {
        self.resolver.resolve(key)
    }

    /// Read the stored value of secret `name`; `NotFound` if unset
    pub fn resolve_secret(&self, name: &str) -> Result<Versioned> {
        self.resolver
            .resolve_secret(name)?
            .ok_or_else(|| Error::not_found(Key::secret(name)))
    }

    /// Write a general key
    pub fn assign_general(&self, key: &[u8], value: &[u8], options: WriteOptions) -> Result<u64> {
        self.resolver.assign_general(key, value, options)
    }

    /// Write secret `name`
    pub fn assign_secret(&self, name: &str, payload: &[u8]) -> Result<SecretAssignment> {
        self.resolver.assign_secret(name, payload)
    }

    /// Export the keys under `prefix` as of one snapshot
    pub fn export_prefix(&self, prefix: &[u8]) -> Result<SnapshotDocument> {
        self.exporter.export_document(prefix)
    }

    // ========================================================================
    // Provisioning
    // ========================================================================

    fn require_gateway(&self) -> Result<&ProvisioningGateway> {
        self.gateway
            .as_deref()
            .ok_or_else(|| Error::provisioning("no provisioning backend configured"))
    }

    /// Secrets whose payload lives in the orchestrator, as mounts
    ///
    /// Internal scan of the secret namespace; the values read here never
    /// leave this function except as external ids.
    pub fn referenced_secrets(&self) -> Result<Vec<SecretMount>> {
        let snapshot = self.store.snapshot()?;
        let mut mounts = Vec::new();
        for entry in snapshot.scan(SECRET_PREFIX.as_bytes()) {
            let live = entry
                .versions
                .iter()
                .find(|sv| sv.is_tombstone() || !sv.is_expired_at(snapshot.now()))
                .filter(|sv| !sv.is_tombstone());
            let Some(sv) = live else { continue };
            let Some(id) = parse_secret_reference(sv.value()) else {
                continue;
            };
            let Some(name) = Key::new(entry.key.as_slice()).secret_name() else {
                continue;
            };
            if name.is_empty() || name.contains('/') {
                warn!(
                    target: "hearth::provisioning",
                    secret = %name,
                    "Secret name is not a valid mount file name; skipped"
                );
                continue;
            }
            mounts.push(SecretMount {
                secret: id.to_string(),
                target: name,
            });
        }
        Ok(mounts)
    }

    /// Create service `name` from `image`, mounting every referenced secret
    /// at `/run/secrets/<name>`
    pub fn provision_worker(&self, name: &str, image: &str) -> Result<String> {
        if name.is_empty() || image.is_empty() {
            return Err(Error::invalid_input("service name and image are required"));
        }
        let gateway = self.require_gateway()?;
        let mounts = self.referenced_secrets()?;
        info!(
            target: "hearth::provisioning",
            service = %name,
            mounts = ?mounts.iter().map(|m| format!("{}/{}", SECRET_MOUNT_DIR, m.target)).collect::<Vec<_>>(),
            "Provisioning worker"
        );
        gateway.create_service(name, image, mounts)
    }

    /// Remove service `name`; absent services count as removed
    pub fn remove_worker(&self, name: &str) -> Result<()> {
        self.require_gateway()?.delete_service(name)
    }

    /// External secrets (names and ids only)
    pub fn list_secrets(&self) -> Result<Vec<SecretSummary>> {
        self.require_gateway()?.list_secrets()
    }

    /// Orchestrator services
    pub fn list_services(&self) -> Result<Vec<ServiceSummary>> {
        self.require_gateway()?.list_services()
    }

    /// Orchestrator networks
    pub fn list_networks(&self) -> Result<Vec<NetworkSummary>> {
        self.require_gateway()?.list_networks()
    }

    /// Close the store; later calls fail with `Closed`
    pub fn close(&self) -> Result<()> {
        self.store.close()
    }
}
