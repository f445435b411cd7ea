//! KeyResolver: two-tier key resolution and namespace policy
//!
//! ## Design
//!
//! KeyResolver is a stateless facade over the store. It holds no in-memory
//! state beyond an `Arc<Store>`, an optional provisioning gateway and the
//! lock that serializes secret assignment.
//!
//! ## Resolution
//!
//! ```text
//! key ──► secret:*?  ──yes──► Forbidden
//!           │no
//!           ▼
//!         key found? ──yes──► Direct
//!           │no
//!           ▼
//!   default:key found? ─yes─► Default
//!           │no
//!           ▼
//!         Absent
//! ```
//!
//! Secret keys are reachable only through `resolve_secret` / `assign_secret`.
//! Values of secret keys never reach the logs.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use hearth_core::{
    parse_secret_reference, secret_reference, validate_key, Error, Key, Namespace, Result,
    Versioned, WriteOptions,
};
use hearth_storage::Store;

use crate::gateway::ProvisioningGateway;

/// Outcome of resolving a general key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The key itself holds a live value
    Direct(Versioned),
    /// The key is unset; its `default:` entry answered
    Default(Versioned),
    /// Neither the key nor its default exists
    Absent,
}

impl Resolution {
    /// Short name of the outcome, for logs and headers
    pub fn outcome(&self) -> &'static str {
        match self {
            Resolution::Direct(_) => "direct",
            Resolution::Default(_) => "default",
            Resolution::Absent => "absent",
        }
    }

    /// The resolved value, if any
    pub fn value(&self) -> Option<&Versioned> {
        match self {
            Resolution::Direct(v) | Resolution::Default(v) => Some(v),
            Resolution::Absent => None,
        }
    }

    /// Consume into the resolved value
    pub fn into_value(self) -> Option<Versioned> {
        match self {
            Resolution::Direct(v) | Resolution::Default(v) => Some(v),
            Resolution::Absent => None,
        }
    }

    /// True for `Absent`
    pub fn is_absent(&self) -> bool {
        matches!(self, Resolution::Absent)
    }
}

/// What a secret write left in the store
#[derive(Clone, PartialEq, Eq)]
pub enum SecretAssignment {
    /// The payload went to the orchestrator; the store holds `token`
    Referenced {
        /// The `docker-secret:<id>` token written locally
        token: String,
        /// Store version of the write
        version: u64,
    },
    /// No gateway configured; the payload is stored locally
    Stored {
        /// Store version of the write
        version: u64,
    },
}

impl SecretAssignment {
    /// Body returned to the caller: the token, or `ok`
    pub fn response_body(&self) -> &str {
        match self {
            SecretAssignment::Referenced { token, .. } => token,
            SecretAssignment::Stored { .. } => "ok",
        }
    }

    /// Store version of the write
    pub fn version(&self) -> u64 {
        match self {
            SecretAssignment::Referenced { version, .. } | SecretAssignment::Stored { version } => {
                *version
            }
        }
    }
}

impl std::fmt::Debug for SecretAssignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretAssignment::Referenced { token, version } => f
                .debug_struct("Referenced")
                .field("token", token)
                .field("version", version)
                .finish(),
            SecretAssignment::Stored { version } => f
                .debug_struct("Stored")
                .field("payload", &"[REDACTED]")
                .field("version", version)
                .finish(),
        }
    }
}

/// Resolver over a shared store
#[derive(Debug, Clone)]
pub struct KeyResolver {
    store: Arc<Store>,
    gateway: Option<Arc<ProvisioningGateway>>,
    /// Held across read-previous / mint / put of a secret write
    secret_writes: Arc<Mutex<()>>,
}

impl KeyResolver {
    /// Create a resolver; with a gateway, secret payloads go external
    pub fn new(store: Arc<Store>, gateway: Option<Arc<ProvisioningGateway>>) -> Self {
        Self {
            store,
            gateway,
            secret_writes: Arc::new(Mutex::new(())),
        }
    }

    /// Resolve a general key through the override/default tiers
    pub fn resolve(&self, key: &[u8]) -> Result<Resolution> {
        validate_key(key)?;
        let key = Key::new(key);
        if key.is_secret() {
            warn!(target: "hearth::resolver", key = %key, "Secret key requested through general path");
            return Err(Error::forbidden(&key, "secret keys are only readable through the secret path"));
        }

        let resolution = match self.store.get(key.as_bytes())? {
            Some(v) => Resolution::Direct(v),
            None => match self.store.get(key.default_for().as_bytes())? {
                Some(v) => Resolution::Default(v),
                None => Resolution::Absent,
            },
        };
        debug!(
            target: "hearth::resolver",
            key = %key,
            outcome = resolution.outcome(),
            "Resolved"
        );
        Ok(resolution)
    }

    /// Read the stored value of secret `name`
    ///
    /// Returns the reference token when the payload lives in the
    /// orchestrator, or the payload itself when stored locally.
    pub fn resolve_secret(&self, name: &str) -> Result<Option<Versioned>> {
        let key = secret_key(name)?;
        let value = self.store.get(key.as_bytes())?;
        debug!(
            target: "hearth::resolver",
            secret = %name,
            found = value.is_some(),
            value = "[REDACTED]",
            "Secret read"
        );
        Ok(value)
    }

    /// Write a general key
    ///
    /// The `secret:` and `default:` namespaces are refused.
    pub fn assign_general(&self, key: &[u8], value: &[u8], options: WriteOptions) -> Result<u64> {
        validate_key(key)?;
        let key = Key::new(key);
        match key.namespace() {
            Namespace::Secret => {
                warn!(target: "hearth::resolver", key = %key, "Secret key written through general path");
                return Err(Error::forbidden(&key, "secret keys are only writable through the secret path"));
            }
            Namespace::Default => {
                warn!(target: "hearth::resolver", key = %key, "Write to default namespace refused");
                return Err(Error::forbidden(&key, "defaults are seeded at startup"));
            }
            Namespace::General => {}
        }

        let version = self.store.put_with(key.as_bytes(), value, options)?;
        debug!(target: "hearth::resolver", key = %key, version, "Assigned");
        Ok(version)
    }

    /// Write secret `name`
    ///
    /// With a gateway, a new external secret is minted for `payload`, the
    /// store receives its reference token, and the previously referenced
    /// external secret is removed (best-effort). Without one, the payload is
    /// stored under `secret:<name>`.
    ///
    /// Secret writes are serialized, so concurrent rotations each remove the
    /// external secret the one before them minted.
    pub fn assign_secret(&self, name: &str, payload: &[u8]) -> Result<SecretAssignment> {
        let key = secret_key(name)?;
        let _guard = self.secret_writes.lock();
        let gateway = match &self.gateway {
            Some(gateway) => gateway,
            None => {
                let version = self.store.put(key.as_bytes(), payload)?;
                info!(
                    target: "hearth::resolver",
                    secret = %name,
                    version,
                    value = "[REDACTED]",
                    "Secret stored locally"
                );
                return Ok(SecretAssignment::Stored { version });
            }
        };

        let previous = self.store.get(key.as_bytes())?;
        let external_id = gateway.create_secret(name, payload)?;
        let token = secret_reference(&external_id);

        let version = match self.store.put(key.as_bytes(), token.as_bytes()) {
            Ok(version) => version,
            Err(e) => {
                // The token never landed; drop the orphan
                if let Err(cleanup) = gateway.delete_secret(&external_id) {
                    warn!(
                        target: "hearth::resolver",
                        secret = %name,
                        error = %cleanup,
                        "Failed to remove orphaned external secret"
                    );
                }
                return Err(e);
            }
        };

        if let Some(old_id) = previous
            .as_ref()
            .and_then(|v| parse_secret_reference(&v.value))
            .filter(|old_id| *old_id != external_id)
        {
            if let Err(e) = gateway.delete_secret(old_id) {
                warn!(
                    target: "hearth::resolver",
                    secret = %name,
                    previous = %old_id,
                    error = %e,
                    "Previous external secret left in place"
                );
            }
        }

        info!(
            target: "hearth::resolver",
            secret = %name,
            token = %token,
            version,
            "Secret assigned"
        );
        Ok(SecretAssignment::Referenced { token, version })
    }
}

/// The store key of secret `name`
fn secret_key(name: &str) -> Result<Key> {
    if name.is_empty() {
        return Err(Error::invalid_input("secret name cannot be empty"));
    }
    let key = Key::secret(name);
    key.validate()?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::gateway::{
        InMemoryOrchestrator, NetworkSummary, Orchestrator, OrchestratorResult, SecretSummary,
        ServiceRequest, ServiceSummary,
    };
    use hearth_core::SECRET_REF_PREFIX;

    fn setup() -> (Arc<Store>, KeyResolver) {
        let store = Arc::new(Store::in_memory());
        let resolver = KeyResolver::new(Arc::clone(&store), None);
        (store, resolver)
    }

    fn with_gateway() -> (Arc<Store>, Arc<InMemoryOrchestrator>, KeyResolver) {
        let store = Arc::new(Store::in_memory());
        let backend = Arc::new(InMemoryOrchestrator::new());
        let gateway = Arc::new(ProvisioningGateway::new(backend.clone(), "hearth.secret"));
        let resolver = KeyResolver::new(Arc::clone(&store), Some(gateway));
        (store, backend, resolver)
    }

    #[test]
    fn test_resolver_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KeyResolver>();
    }

    #[test]
    fn test_direct_wins_over_default() {
        let (store, resolver) = setup();
        store.put(b"default:tHomeRadiusFt", b"100").unwrap();
        resolver
            .assign_general(b"tHomeRadiusFt", b"150", WriteOptions::default())
            .unwrap();
        let r = resolver.resolve(b"tHomeRadiusFt").unwrap();
        assert_eq!(r.outcome(), "direct");
        assert_eq!(r.value().unwrap().value, b"150".to_vec());
    }

    #[test]
    fn test_falls_back_to_default() {
        let (store, resolver) = setup();
        store.put(b"default:tHomeRadiusFt", b"100").unwrap();
        match resolver.resolve(b"tHomeRadiusFt").unwrap() {
            Resolution::Default(v) => assert_eq!(v.value, b"100".to_vec()),
            other => panic!("expected default, got {:?}", other),
        }
    }

    #[test]
    fn test_absent_when_neither() {
        let (_store, resolver) = setup();
        assert!(resolver.resolve(b"nothing").unwrap().is_absent());
    }

    #[test]
    fn test_secret_key_forbidden_on_general_path() {
        let (store, resolver) = setup();
        store.put(b"secret:apiToken", b"abcdef").unwrap();
        let err = resolver.resolve(b"secret:apiToken").unwrap_err();
        assert!(err.is_forbidden());
        // Also when nothing is stored
        assert!(resolver.resolve(b"secret:missing").unwrap_err().is_forbidden());
        // "secret" alone (no colon) is a general key
        assert!(resolver.resolve(b"secretThing").unwrap().is_absent());
    }

    #[test]
    fn test_general_writes_refuse_reserved_namespaces() {
        let (store, resolver) = setup();
        let opts = WriteOptions::default();
        assert!(resolver.assign_general(b"secret:x", b"v", opts).unwrap_err().is_forbidden());
        assert!(resolver.assign_general(b"default:x", b"v", opts).unwrap_err().is_forbidden());
        assert_eq!(store.current_version(), 0);
    }

    #[test]
    fn test_empty_key_is_invalid() {
        let (_store, resolver) = setup();
        assert!(matches!(resolver.resolve(b""), Err(Error::InvalidInput(_))));
        assert!(matches!(resolver.assign_secret("", b"x"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_secret_stored_locally_without_gateway() {
        let (store, resolver) = setup();
        let assignment = resolver.assign_secret("apiToken", b"abcdef").unwrap();
        assert_eq!(assignment.response_body(), "ok");
        assert_eq!(
            resolver.resolve_secret("apiToken").unwrap().unwrap().value,
            b"abcdef".to_vec()
        );
        assert_eq!(store.get(b"secret:apiToken").unwrap().unwrap().value, b"abcdef".to_vec());
        assert!(!format!("{:?}", assignment).contains("abcdef"));
    }

    #[test]
    fn test_secret_goes_external_with_gateway() {
        let (store, backend, resolver) = with_gateway();
        let assignment = resolver.assign_secret("apiToken", b"abcdef").unwrap();
        let token = assignment.response_body().to_string();
        assert!(token.starts_with(SECRET_REF_PREFIX));

        let stored = resolver.resolve_secret("apiToken").unwrap().unwrap();
        assert_eq!(stored.value, token.as_bytes().to_vec());
        assert_eq!(store.get(b"secret:apiToken").unwrap().unwrap().value, token.into_bytes());

        let id = parse_secret_reference(&stored.value).unwrap();
        assert_eq!(backend.secret_payload(id).unwrap(), b"abcdef".to_vec());
    }

    #[test]
    fn test_secret_rotation_removes_previous() {
        let (_store, backend, resolver) = with_gateway();
        let first = resolver.assign_secret("apiToken", b"one").unwrap();
        let second = resolver.assign_secret("apiToken", b"two").unwrap();
        assert_ne!(first.response_body(), second.response_body());
        assert_eq!(backend.secret_count(), 1);

        let first_id = parse_secret_reference(first.response_body().as_bytes()).unwrap();
        assert!(backend.secret_payload(first_id).is_none());
    }

    #[test]
    fn test_gateway_failure_writes_nothing() {
        let (store, backend, resolver) = with_gateway();
        backend.set_available(false);
        let err = resolver.assign_secret("apiToken", b"abcdef").unwrap_err();
        assert!(matches!(err, Error::Provisioning(_)));
        assert!(store.get(b"secret:apiToken").unwrap().is_none());
    }

    /// Closes the store as soon as a secret is minted, so the token write fails
    struct ClosingOrchestrator {
        inner: InMemoryOrchestrator,
        store: Arc<Store>,
    }

    impl Orchestrator for ClosingOrchestrator {
        fn backend(&self) -> &'static str {
            "closing"
        }

        fn create_secret(
            &self,
            name: &str,
            labels: &BTreeMap<String, String>,
            payload: &[u8],
        ) -> OrchestratorResult<String> {
            let id = self.inner.create_secret(name, labels, payload)?;
            self.store.close().unwrap();
            Ok(id)
        }

        fn delete_secret(&self, id_or_name: &str) -> OrchestratorResult<()> {
            self.inner.delete_secret(id_or_name)
        }

        fn list_secrets(&self) -> OrchestratorResult<Vec<SecretSummary>> {
            self.inner.list_secrets()
        }

        fn create_service(&self, request: &ServiceRequest) -> OrchestratorResult<String> {
            self.inner.create_service(request)
        }

        fn delete_service(&self, id_or_name: &str) -> OrchestratorResult<()> {
            self.inner.delete_service(id_or_name)
        }

        fn list_services(&self) -> OrchestratorResult<Vec<ServiceSummary>> {
            self.inner.list_services()
        }

        fn list_networks(&self) -> OrchestratorResult<Vec<NetworkSummary>> {
            self.inner.list_networks()
        }
    }

    #[test]
    fn test_failed_token_write_removes_minted_secret() {
        let store = Arc::new(Store::in_memory());
        let backend = Arc::new(ClosingOrchestrator {
            inner: InMemoryOrchestrator::new(),
            store: Arc::clone(&store),
        });
        let gateway = Arc::new(ProvisioningGateway::new(backend.clone(), "hearth.secret"));
        let resolver = KeyResolver::new(Arc::clone(&store), Some(gateway));

        let err = resolver.assign_secret("apiToken", b"abcdef").unwrap_err();
        assert!(matches!(err, Error::Closed));
        assert_eq!(backend.inner.secret_count(), 0);
    }

    #[test]
    fn test_concurrent_rotation_leaves_one_secret() {
        let (store, backend, resolver) = with_gateway();
        let writers: Vec<_> = (0..8)
            .map(|i| {
                let resolver = resolver.clone();
                std::thread::spawn(move || {
                    for j in 0..10 {
                        let payload = format!("{}-{}", i, j);
                        resolver.assign_secret("apiToken", payload.as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(backend.secret_count(), 1);
        let stored = store.get(b"secret:apiToken").unwrap().unwrap();
        let id = parse_secret_reference(&stored.value).unwrap();
        assert!(backend.secret_payload(id).is_some());
    }

    #[test]
    fn test_resolve_missing_secret() {
        let (_store, resolver) = setup();
        assert!(resolver.resolve_secret("nope").unwrap().is_none());
    }
}
