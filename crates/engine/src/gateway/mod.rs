//! Provisioning gateway
//!
//! Maps logical secret and service names onto a container orchestrator.
//!
//! ## Design
//!
//! - `Orchestrator` is the seam: one trait, one implementation per backend
//!   (`InMemoryOrchestrator`, `DockerOrchestrator`)
//! - `ProvisioningGateway` owns the policy on top of it: unique external
//!   secret names, best-effort deletes, logging, error mapping
//! - Failures surface as `Error::Provisioning` and are never retried
//! - Payloads never appear in logs or listings

mod docker;
mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use hearth_core::{Error, Result};

pub use docker::DockerOrchestrator;
pub use memory::InMemoryOrchestrator;

/// Directory secrets are mounted under inside a worker container
pub const SECRET_MOUNT_DIR: &str = "/run/secrets";

/// Longest external secret name we generate (Docker allows 64)
const MAX_EXTERNAL_NAME: usize = 64;

/// Errors reported by an orchestrator backend
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The named object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The orchestrator could not be reached
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),

    /// The orchestrator refused the request
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Result type for orchestrator calls
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// A secret as listed by the orchestrator (never its payload)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretSummary {
    /// Orchestrator-assigned id
    pub id: String,
    /// External (unique) name
    pub name: String,
    /// Logical name from the gateway label, if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logical_name: Option<String>,
}

/// A service as listed by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSummary {
    /// Orchestrator-assigned id
    pub id: String,
    /// Service name
    pub name: String,
    /// Container image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// External names of the mounted secrets
    pub secrets: Vec<String>,
}

/// A network as listed by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkSummary {
    /// Orchestrator-assigned id
    pub id: String,
    /// Network name
    pub name: String,
    /// Network driver
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

/// One secret to mount into a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMount {
    /// External secret id or name
    pub secret: String,
    /// File name under `/run/secrets`
    pub target: String,
}

/// Everything needed to create a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    /// Service name
    pub name: String,
    /// Container image
    pub image: String,
    /// Secrets to mount
    pub secrets: Vec<SecretMount>,
    /// Network to attach to
    pub network: Option<String>,
    /// Service labels
    pub labels: BTreeMap<String, String>,
}

/// Capabilities of a container orchestrator
///
/// Implementations must be safe to call from several HTTP workers at once.
pub trait Orchestrator: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Register a secret; returns its id
    fn create_secret(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        payload: &[u8],
    ) -> OrchestratorResult<String>;

    /// Remove a secret by id or name
    fn delete_secret(&self, id_or_name: &str) -> OrchestratorResult<()>;

    /// List secrets
    fn list_secrets(&self) -> OrchestratorResult<Vec<SecretSummary>>;

    /// Create a service; returns its id
    fn create_service(&self, request: &ServiceRequest) -> OrchestratorResult<String>;

    /// Remove a service by id or name
    fn delete_service(&self, id_or_name: &str) -> OrchestratorResult<()>;

    /// List services
    fn list_services(&self) -> OrchestratorResult<Vec<ServiceSummary>>;

    /// List networks
    fn list_networks(&self) -> OrchestratorResult<Vec<NetworkSummary>>;
}

/// Policy layer over an `Orchestrator`
#[derive(Clone)]
pub struct ProvisioningGateway {
    orchestrator: Arc<dyn Orchestrator>,
    label: String,
    network: Option<String>,
}

impl fmt::Debug for ProvisioningGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningGateway")
            .field("backend", &self.orchestrator.backend())
            .field("label", &self.label)
            .field("network", &self.network)
            .finish()
    }
}

impl ProvisioningGateway {
    /// Wrap an orchestrator
    ///
    /// `label` is the label key that carries a secret's logical name.
    pub fn new(orchestrator: Arc<dyn Orchestrator>, label: impl Into<String>) -> Self {
        ProvisioningGateway {
            orchestrator,
            label: label.into(),
            network: None,
        }
    }

    /// Attach services created by this gateway to `network`
    pub fn with_network(mut self, network: Option<String>) -> Self {
        self.network = network;
        self
    }

    /// The label key holding logical names
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Network services are attached to
    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    /// Register `payload` under a fresh external name for `name`
    ///
    /// Never overwrites: every call creates a new secret. Returns the
    /// orchestrator's id for it.
    pub fn create_secret(&self, name: &str, payload: &[u8]) -> Result<String> {
        let external = external_secret_name(name);
        let mut labels = BTreeMap::new();
        labels.insert(self.label.clone(), name.to_string());

        match self.orchestrator.create_secret(&external, &labels, payload) {
            Ok(id) => {
                info!(
                    target: "hearth::provisioning",
                    secret = %name,
                    external = %external,
                    id = %id,
                    "Secret created"
                );
                Ok(id)
            }
            Err(e) => Err(self.fault("create_secret", name, e)),
        }
    }

    /// Remove a secret; a missing secret counts as removed
    pub fn delete_secret(&self, id_or_name: &str) -> Result<()> {
        match self.orchestrator.delete_secret(id_or_name) {
            Ok(()) => {
                info!(target: "hearth::provisioning", secret = %id_or_name, "Secret deleted");
                Ok(())
            }
            Err(OrchestratorError::NotFound(_)) => {
                debug!(target: "hearth::provisioning", secret = %id_or_name, "Secret already absent");
                Ok(())
            }
            Err(e) => Err(self.fault("delete_secret", id_or_name, e)),
        }
    }

    /// Create a service mounting `secrets`
    pub fn create_service(&self, name: &str, image: &str, secrets: Vec<SecretMount>) -> Result<String> {
        let mut labels = BTreeMap::new();
        labels.insert(self.label.clone(), name.to_string());
        let request = ServiceRequest {
            name: name.to_string(),
            image: image.to_string(),
            secrets,
            network: self.network.clone(),
            labels,
        };

        match self.orchestrator.create_service(&request) {
            Ok(id) => {
                info!(
                    target: "hearth::provisioning",
                    service = %name,
                    image = %image,
                    secrets = request.secrets.len(),
                    id = %id,
                    "Service created"
                );
                Ok(id)
            }
            Err(e) => Err(self.fault("create_service", name, e)),
        }
    }

    /// Remove a service; a missing service counts as removed
    pub fn delete_service(&self, name: &str) -> Result<()> {
        match self.orchestrator.delete_service(name) {
            Ok(()) => {
                info!(target: "hearth::provisioning", service = %name, "Service deleted");
                Ok(())
            }
            Err(OrchestratorError::NotFound(_)) => {
                debug!(target: "hearth::provisioning", service = %name, "Service already absent");
                Ok(())
            }
            Err(e) => Err(self.fault("delete_service", name, e)),
        }
    }

    /// List secrets (names and ids only)
    pub fn list_secrets(&self) -> Result<Vec<SecretSummary>> {
        self.orchestrator
            .list_secrets()
            .map_err(|e| self.fault("list_secrets", "*", e))
    }

    /// List services
    pub fn list_services(&self) -> Result<Vec<ServiceSummary>> {
        self.orchestrator
            .list_services()
            .map_err(|e| self.fault("list_services", "*", e))
    }

    /// List networks
    pub fn list_networks(&self) -> Result<Vec<NetworkSummary>> {
        self.orchestrator
            .list_networks()
            .map_err(|e| self.fault("list_networks", "*", e))
    }

    fn fault(&self, op: &'static str, target: &str, e: OrchestratorError) -> Error {
        error!(
            target: "hearth::provisioning",
            op,
            target_name = %target,
            backend = self.orchestrator.backend(),
            error = %e,
            "Orchestrator call failed"
        );
        Error::provisioning(format!("{} '{}': {}", op, target, e))
    }
}

/// A unique orchestrator-safe name for logical secret `name`
///
/// Characters outside `[A-Za-z0-9_.-]` become `-`; the result is
/// `<name>-<12 hex chars>`.
pub fn external_secret_name(name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let suffix = &suffix[..12];
    let mut base: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if !base.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        base.insert(0, 's');
    }
    base.truncate(MAX_EXTERNAL_NAME - suffix.len() - 1);
    format!("{}-{}", base, suffix)
}
