//! Docker swarm orchestrator using bollard
//!
//! bollard is async; the gateway is called from synchronous HTTP workers,
//! so every call is driven to completion on a private tokio runtime.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bollard::errors::Error as DockerError;
use bollard::models::{
    NetworkAttachmentConfig, SecretSpec, ServiceSpec, TaskSpec, TaskSpecContainerSpec,
    TaskSpecContainerSpecFile, TaskSpecContainerSpecSecrets,
};
use bollard::query_parameters::{ListNetworksOptions, ListSecretsOptions, ListServicesOptions};
use bollard::Docker;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use super::{
    NetworkSummary, Orchestrator, OrchestratorError, OrchestratorResult, SecretSummary,
    ServiceRequest, ServiceSummary,
};

/// Orchestrator backed by the local Docker daemon in swarm mode
pub struct DockerOrchestrator {
    runtime: Runtime,
    docker: Docker,
    /// Label key whose value is reported as a secret's logical name
    label: String,
}

impl fmt::Debug for DockerOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerOrchestrator").finish_non_exhaustive()
    }
}

impl DockerOrchestrator {
    /// Connect to the local Docker daemon
    ///
    /// Uses the platform defaults (`/var/run/docker.sock` on Linux) and
    /// pings the daemon before returning.
    pub fn connect(label: impl Into<String>) -> OrchestratorResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("hearth-docker")
            .enable_all()
            .build()
            .map_err(|e| OrchestratorError::Unavailable(format!("failed to start runtime: {}", e)))?;

        let docker = {
            let _guard = runtime.enter();
            Docker::connect_with_local_defaults().map_err(|e| {
                OrchestratorError::Unavailable(format!("failed to connect to Docker: {}", e))
            })?
        };
        runtime
            .block_on(docker.ping())
            .map_err(|e| OrchestratorError::Unavailable(format!("Docker ping failed: {}", e)))?;

        info!(target: "hearth::provisioning", "Connected to Docker daemon");
        Ok(DockerOrchestrator {
            runtime,
            docker,
            label: label.into(),
        })
    }

    fn run<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Name of a secret, given its id or name
    fn secret_name(&self, id_or_name: &str) -> OrchestratorResult<String> {
        let secret = self
            .run(self.docker.inspect_secret(id_or_name))
            .map_err(|e| map_error(id_or_name, e))?;
        Ok(secret
            .spec
            .and_then(|spec| spec.name)
            .unwrap_or_else(|| id_or_name.to_string()))
    }
}

fn map_error(target: &str, e: DockerError) -> OrchestratorError {
    match e {
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        } => OrchestratorError::NotFound(target.to_string()),
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } if status_code < 500 => OrchestratorError::Rejected(format!("{}: {}", status_code, message)),
        other => OrchestratorError::Unavailable(other.to_string()),
    }
}

fn to_hash_map(labels: &BTreeMap<String, String>) -> HashMap<String, String> {
    labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

impl Orchestrator for DockerOrchestrator {
    fn backend(&self) -> &'static str {
        "docker"
    }

    fn create_secret(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        payload: &[u8],
    ) -> OrchestratorResult<String> {
        let spec = SecretSpec {
            name: Some(name.to_string()),
            labels: Some(to_hash_map(labels)),
            data: Some(STANDARD.encode(payload)),
            ..Default::default()
        };
        let response = self
            .run(self.docker.create_secret(spec))
            .map_err(|e| map_error(name, e))?;
        Ok(response.id)
    }

    fn delete_secret(&self, id_or_name: &str) -> OrchestratorResult<()> {
        self.run(self.docker.delete_secret(id_or_name))
            .map_err(|e| map_error(id_or_name, e))
    }

    fn list_secrets(&self) -> OrchestratorResult<Vec<SecretSummary>> {
        let secrets = self
            .run(self.docker.list_secrets(None::<ListSecretsOptions>))
            .map_err(|e| map_error("secrets", e))?;
        Ok(secrets
            .into_iter()
            .map(|secret| {
                let spec = secret.spec.unwrap_or_default();
                SecretSummary {
                    id: secret.id.unwrap_or_default(),
                    name: spec.name.unwrap_or_default(),
                    logical_name: spec.labels.and_then(|mut l| l.remove(&self.label)),
                }
            })
            .collect())
    }

    fn create_service(&self, request: &ServiceRequest) -> OrchestratorResult<String> {
        let mut secrets = Vec::with_capacity(request.secrets.len());
        for mount in &request.secrets {
            secrets.push(TaskSpecContainerSpecSecrets {
                file: Some(TaskSpecContainerSpecFile {
                    name: Some(mount.target.clone()),
                    uid: Some("0".to_string()),
                    gid: Some("0".to_string()),
                    mode: Some(0o444),
                }),
                secret_id: Some(mount.secret.clone()),
                secret_name: Some(self.secret_name(&mount.secret)?),
            });
        }

        let networks = request.network.as_ref().map(|network| {
            vec![NetworkAttachmentConfig {
                target: Some(network.clone()),
                ..Default::default()
            }]
        });

        let spec = ServiceSpec {
            name: Some(request.name.clone()),
            labels: Some(to_hash_map(&request.labels)),
            task_template: Some(TaskSpec {
                container_spec: Some(TaskSpecContainerSpec {
                    image: Some(request.image.clone()),
                    secrets: Some(secrets),
                    ..Default::default()
                }),
                networks,
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self
            .run(self.docker.create_service(spec, None))
            .map_err(|e| map_error(&request.name, e))?;
        Ok(response.id.unwrap_or_else(|| request.name.clone()))
    }

    fn delete_service(&self, id_or_name: &str) -> OrchestratorResult<()> {
        self.run(self.docker.delete_service(id_or_name))
            .map_err(|e| map_error(id_or_name, e))
    }

    fn list_services(&self) -> OrchestratorResult<Vec<ServiceSummary>> {
        let services = self
            .run(self.docker.list_services(None::<ListServicesOptions>))
            .map_err(|e| map_error("services", e))?;
        Ok(services
            .into_iter()
            .map(|service| {
                let spec = service.spec.unwrap_or_default();
                let container = spec
                    .task_template
                    .and_then(|t| t.container_spec)
                    .unwrap_or_default();
                ServiceSummary {
                    id: service.id.unwrap_or_default(),
                    name: spec.name.unwrap_or_default(),
                    image: container.image,
                    secrets: container
                        .secrets
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|s| s.secret_name.or(s.secret_id))
                        .collect(),
                }
            })
            .collect())
    }

    fn list_networks(&self) -> OrchestratorResult<Vec<NetworkSummary>> {
        let networks = self
            .run(self.docker.list_networks(None::<ListNetworksOptions>))
            .map_err(|e| map_error("networks", e))?;
        Ok(networks
            .into_iter()
            .map(|network| NetworkSummary {
                id: network.id.unwrap_or_default(),
                name: network.name.unwrap_or_default(),
                driver: network.driver,
            })
            .collect())
    }
}
