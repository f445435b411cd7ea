//! In-process orchestrator
//!
//! Keeps secrets, services and networks in memory. Backs the `memory`
//! provisioning backend and the test suites.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    NetworkSummary, Orchestrator, OrchestratorError, OrchestratorResult, SecretSummary,
    ServiceRequest, ServiceSummary,
};

#[derive(Debug)]
struct StoredSecret {
    name: String,
    labels: BTreeMap<String, String>,
    payload: Vec<u8>,
}

#[derive(Debug)]
struct State {
    available: bool,
    /// id → secret
    secrets: BTreeMap<String, StoredSecret>,
    /// id → service
    services: BTreeMap<String, ServiceRequest>,
    networks: Vec<NetworkSummary>,
}

/// Orchestrator that keeps everything in memory
#[derive(Debug)]
pub struct InMemoryOrchestrator {
    state: Mutex<State>,
}

impl Default for InMemoryOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOrchestrator {
    /// Create an empty orchestrator with a single `ingress` network
    pub fn new() -> Self {
        InMemoryOrchestrator {
            state: Mutex::new(State {
                available: true,
                secrets: BTreeMap::new(),
                services: BTreeMap::new(),
                networks: vec![NetworkSummary {
                    id: new_id(),
                    name: "ingress".to_string(),
                    driver: Some("overlay".to_string()),
                }],
            }),
        }
    }

    /// Add a network
    pub fn add_network(&self, name: &str, driver: &str) {
        self.state.lock().networks.push(NetworkSummary {
            id: new_id(),
            name: name.to_string(),
            driver: Some(driver.to_string()),
        });
    }

    /// Make every call fail with `Unavailable` (or recover)
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    /// Payload of a secret, by id
    pub fn secret_payload(&self, id: &str) -> Option<Vec<u8>> {
        self.state.lock().secrets.get(id).map(|s| s.payload.clone())
    }

    /// Number of secrets held
    pub fn secret_count(&self) -> usize {
        self.state.lock().secrets.len()
    }

    /// The request a service was created from, by name
    pub fn service_request(&self, name: &str) -> Option<ServiceRequest> {
        self.state
            .lock()
            .services
            .values()
            .find(|s| s.name == name)
            .cloned()
    }

    fn check(state: &State) -> OrchestratorResult<()> {
        if state.available {
            Ok(())
        } else {
            Err(OrchestratorError::Unavailable("in-memory backend disabled".to_string()))
        }
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Find the id of an object addressed by id or by name
fn resolve<'a, T>(
    map: &'a BTreeMap<String, T>,
    id_or_name: &str,
    name_of: impl Fn(&T) -> &str,
) -> Option<&'a String> {
    if let Some((id, _)) = map.get_key_value(id_or_name) {
        return Some(id);
    }
    map.iter()
        .find(|(_, v)| name_of(v) == id_or_name)
        .map(|(id, _)| id)
}

impl Orchestrator for InMemoryOrchestrator {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn create_secret(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        payload: &[u8],
    ) -> OrchestratorResult<String> {
        let mut state = self.state.lock();
        Self::check(&state)?;
        if state.secrets.values().any(|s| s.name == name) {
            return Err(OrchestratorError::Rejected(format!(
                "secret '{}' already exists",
                name
            )));
        }
        let id = new_id();
        state.secrets.insert(
            id.clone(),
            StoredSecret {
                name: name.to_string(),
                labels: labels.clone(),
                payload: payload.to_vec(),
            },
        );
        Ok(id)
    }

    fn delete_secret(&self, id_or_name: &str) -> OrchestratorResult<()> {
        let mut state = self.state.lock();
        Self::check(&state)?;
        let id = resolve(&state.secrets, id_or_name, |s| s.name.as_str())
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(id_or_name.to_string()))?;
        let in_use = state
            .services
            .values()
            .any(|svc| svc.secrets.iter().any(|m| m.secret == id));
        if in_use {
            return Err(OrchestratorError::Rejected(format!(
                "secret '{}' is in use by a service",
                id_or_name
            )));
        }
        state.secrets.remove(&id);
        Ok(())
    }

    fn list_secrets(&self) -> OrchestratorResult<Vec<SecretSummary>> {
        let state = self.state.lock();
        Self::check(&state)?;
        Ok(state
            .secrets
            .iter()
            .map(|(id, s)| SecretSummary {
                id: id.clone(),
                name: s.name.clone(),
                logical_name: s.labels.values().next().cloned(),
            })
            .collect())
    }

    fn create_service(&self, request: &ServiceRequest) -> OrchestratorResult<String> {
        let mut state = self.state.lock();
        Self::check(&state)?;
        if state.services.values().any(|s| s.name == request.name) {
            return Err(OrchestratorError::Rejected(format!(
                "service '{}' already exists",
                request.name
            )));
        }
        for mount in &request.secrets {
            if resolve(&state.secrets, &mount.secret, |s| s.name.as_str()).is_none() {
                return Err(OrchestratorError::Rejected(format!(
                    "secret '{}' not found",
                    mount.secret
                )));
            }
        }
        if let Some(network) = &request.network {
            if !state.networks.iter().any(|n| &n.name == network || &n.id == network) {
                return Err(OrchestratorError::Rejected(format!(
                    "network '{}' not found",
                    network
                )));
            }
        }
        let id = new_id();
        state.services.insert(id.clone(), request.clone());
        Ok(id)
    }

    fn delete_service(&self, id_or_name: &str) -> OrchestratorResult<()> {
        let mut state = self.state.lock();
        Self::check(&state)?;
        let id = resolve(&state.services, id_or_name, |s| s.name.as_str())
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(id_or_name.to_string()))?;
        state.services.remove(&id);
        Ok(())
    }

    fn list_services(&self) -> OrchestratorResult<Vec<ServiceSummary>> {
        let state = self.state.lock();
        Self::check(&state)?;
        Ok(state
            .services
            .iter()
            .map(|(id, s)| ServiceSummary {
                id: id.clone(),
                name: s.name.clone(),
                image: Some(s.image.clone()),
                secrets: s
                    .secrets
                    .iter()
                    .map(|m| {
                        state
                            .secrets
                            .get(&m.secret)
                            .map_or_else(|| m.secret.clone(), |secret| secret.name.clone())
                    })
                    .collect(),
            })
            .collect())
    }

    fn list_networks(&self) -> OrchestratorResult<Vec<NetworkSummary>> {
        let state = self.state.lock();
        Self::check(&state)?;
        Ok(state.networks.clone())
    }
}
