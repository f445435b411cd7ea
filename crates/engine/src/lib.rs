//! Service engine for Hearth
//!
//! This crate sits between the HTTP surface and the store:
//! - KeyResolver: override/default resolution and namespace policy
//! - SnapshotExporter: consistent prefix exports
//! - ProvisioningGateway: secrets and worker services in a container orchestrator
//! - Defaults seeding and `hearth.toml` configuration
//! - Service: the context handed to request handlers
//!
//! Nothing here owns a thread or a socket; the daemon wires the pieces up.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod defaults;
pub mod exporter;
pub mod gateway;
pub mod resolver;
pub mod service;

pub use config::{HearthConfig, ProvisioningBackend, ProvisioningConfig, CONFIG_FILE_NAME};
pub use defaults::{merged_defaults, seed_defaults, SeedMode, SeedReport, BUILTIN_DEFAULTS};
pub use exporter::SnapshotExporter;
pub use gateway::{
    external_secret_name, DockerOrchestrator, InMemoryOrchestrator, NetworkSummary, Orchestrator,
    OrchestratorError, ProvisioningGateway, SecretMount, SecretSummary, ServiceRequest,
    ServiceSummary, SECRET_MOUNT_DIR,
};
pub use resolver::{KeyResolver, Resolution, SecretAssignment};
pub use service::{build_gateway, Service};
