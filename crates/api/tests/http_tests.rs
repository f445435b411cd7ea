//! End-to-end HTTP tests
//!
//! Each test starts a real server on an ephemeral port and talks to it
//! with ureq.

use std::sync::Arc;

use hearth_api::{HttpServer, RESOLUTION_HEADER};
use hearth_engine::{InMemoryOrchestrator, ProvisioningGateway, Service};
use hearth_storage::{Store, StoreOptions};
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

struct Running {
    server: HttpServer,
    service: Arc<Service>,
    base: String,
}

fn start(service: Service) -> Running {
    let service = Arc::new(service);
    let server = HttpServer::start("127.0.0.1:0", Arc::clone(&service), 2).unwrap();
    let base = format!("http://{}", server.local_addr());
    Running {
        server,
        service,
        base,
    }
}

fn start_local() -> Running {
    start(Service::new(Arc::new(Store::in_memory()), None))
}

/// Status and body, whether or not the status is an error
fn send(request: ureq::Request, body: Option<&str>) -> (u16, String) {
    let result = match body {
        Some(body) => request.send_string(body),
        None => request.call(),
    };
    match result {
        Ok(response) => {
            let status = response.status();
            (status, response.into_string().unwrap())
        }
        Err(ureq::Error::Status(status, response)) => (status, response.into_string().unwrap()),
        Err(e) => panic!("transport error: {}", e),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_health() {
    let run = start_local();
    assert_eq!(send(ureq::get(&format!("{}/health", run.base)), None), (200, "ok".to_string()));
    run.server.shutdown();
}

#[test]
fn test_put_then_get_over_http() {
    let run = start_local();
    run.service.store().put(b"default:tHomeRadiusFt", b"100").unwrap();

    let url = format!("{}/badger/tHomeRadiusFt", run.base);
    let response = ureq::get(&url).call().unwrap();
    assert_eq!(response.header(RESOLUTION_HEADER), Some("default"));
    assert_eq!(response.into_string().unwrap(), "100");

    assert_eq!(send(ureq::put(&url), Some("150")), (200, "ok".to_string()));
    let response = ureq::get(&url).call().unwrap();
    assert_eq!(response.header(RESOLUTION_HEADER), Some("direct"));
    assert_eq!(response.into_string().unwrap(), "150");

    let (status, _) = send(ureq::get(&format!("{}/badger/missing", run.base)), None);
    assert_eq!(status, 404);
    run.server.shutdown();
}

#[test]
fn test_ttl_header_over_http() {
    let run = start_local();
    let url = format!("{}/value/tVehicle", run.base);
    let (status, _) = send(ureq::post(&url).set("TTL", "600"), Some("3"));
    assert_eq!(status, 200);
    let stored = run.service.store().get(b"tVehicle").unwrap().unwrap();
    assert!(stored.expires_at > 0);

    let (status, _) = send(ureq::post(&url).set("TTL", "later"), Some("3"));
    assert_eq!(status, 400);
    run.server.shutdown();
}

#[test]
fn test_secret_isolation_over_http() {
    let run = start_local();
    let secret_url = format!("{}/secret/apiToken", run.base);
    assert_eq!(send(ureq::put(&secret_url), Some("abcdef")).0, 200);
    assert_eq!(
        send(ureq::get(&secret_url), None),
        (200, "abcdef".to_string())
    );

    let (status, body) = send(ureq::get(&format!("{}/badger/secret:apiToken", run.base)), None);
    assert_eq!(status, 403);
    assert!(!body.contains("abcdef"));

    let (status, _) = send(ureq::get(&format!("{}/streamr/secret:", run.base)), None);
    assert_eq!(status, 403);
    run.server.shutdown();
}

#[test]
fn test_export_over_http() {
    let run = start_local();
    for (key, value) in [("tHome", "home"), ("tWork", "work"), ("secretThing", "x")] {
        let url = format!("{}/badger/{}", run.base, key);
        assert_eq!(send(ureq::put(&url), Some(value)).0, 200);
    }

    let response = ureq::get(&format!("{}/streamr/t", run.base)).call().unwrap();
    assert_eq!(response.content_type(), "application/json");
    let doc: serde_json::Value = response.into_json().unwrap();
    let keys: Vec<_> = doc["kv"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["key"].as_str().unwrap().to_string())
        .collect();
    // base64 of "tHome" and "tWork"
    assert_eq!(keys, vec!["dEhvbWU=", "dFdvcms="]);
    run.server.shutdown();
}

#[test]
fn test_provisioning_over_http() {
    let backend = Arc::new(InMemoryOrchestrator::new());
    let gateway = ProvisioningGateway::new(backend.clone(), "hearth.secret");
    let run = start(Service::new(
        Arc::new(Store::in_memory()),
        Some(Arc::new(gateway)),
    ));

    let (status, token) = send(ureq::post(&format!("{}/secret/apiToken", run.base)), Some("abcdef"));
    assert_eq!(status, 200);
    assert!(token.starts_with("docker-secret:"));

    let (status, _) = send(
        ureq::post(&format!("{}/provisioning/services/worker", run.base)),
        Some("worker:1"),
    );
    assert_eq!(status, 200);
    let request = backend.service_request("worker").unwrap();
    assert_eq!(request.secrets.len(), 1);
    assert_eq!(request.secrets[0].target, "apiToken");

    let (status, body) = send(ureq::get(&format!("{}/provisioning/secrets", run.base)), None);
    assert_eq!(status, 200);
    assert!(!body.contains("abcdef"));

    let (status, _) = send(
        ureq::request("DELETE", &format!("{}/provisioning/services/worker", run.base)),
        None,
    );
    assert_eq!(status, 200);
    assert!(backend.service_request("worker").is_none());
    run.server.shutdown();
}

#[test]
fn test_restart_keeps_data() {
    let dir = TempDir::new().unwrap();
    {
        let store = Arc::new(Store::open(StoreOptions::persistent(dir.path())).unwrap());
        let run = start(Service::new(store, None));
        let url = format!("{}/badger/tWork", run.base);
        assert_eq!(send(ureq::put(&url), Some("office")).0, 200);
        run.server.shutdown();
        run.service.close().unwrap();
    }

    let store = Arc::new(Store::open(StoreOptions::persistent(dir.path())).unwrap());
    let run = start(Service::new(store, None));
    assert_eq!(
        send(ureq::get(&format!("{}/badger/tWork", run.base)), None),
        (200, "office".to_string())
    );
    run.server.shutdown();
}

#[test]
fn test_concurrent_clients() {
    let run = start_local();
    let base = run.base.clone();
    let clients: Vec<_> = (0..4)
        .map(|c| {
            let base = base.clone();
            std::thread::spawn(move || {
                for i in 0..25 {
                    let url = format!("{}/badger/c{}:{}", base, c, i);
                    assert_eq!(send(ureq::put(&url), Some("v")).0, 200);
                }
            })
        })
        .collect();
    for client in clients {
        client.join().unwrap();
    }
    assert_eq!(run.service.store().current_version(), 100);
    run.server.shutdown();
}
