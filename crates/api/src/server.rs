//! HTTP server
//!
//! One `tiny_http::Server` shared by a fixed pool of worker threads. Each
//! worker blocks in `recv`, serves the request to completion and loops.
//! Shutdown sets a flag, unblocks every worker and joins them, so requests
//! already being served finish normally.

use std::io::Read;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tiny_http::{Header, Request, Response, Server};
use tracing::{debug, info, warn};

use hearth_core::{Error, Result};
use hearth_engine::Service;

use crate::request::{ApiRequest, ApiResponse};
use crate::router::handle;

/// Largest request body accepted
pub const MAX_BODY_BYTES: u64 = 1 << 20;

/// A running server
pub struct HttpServer {
    server: Arc<Server>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("addr", &self.addr)
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl HttpServer {
    /// Bind `listen` and start `workers` threads serving `service`
    pub fn start(listen: &str, service: Arc<Service>, workers: usize) -> Result<Self> {
        let server = Server::http(listen)
            .map_err(|e| Error::Io(std::io::Error::other(format!("bind {}: {}", listen, e))))?;
        let addr = server.server_addr().to_ip().ok_or_else(|| {
            Error::invalid_input(format!("'{}' is not an IP listen address", listen))
        })?;
        let server = Arc::new(server);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(workers.max(1));
        for i in 0..workers.max(1) {
            let server = Arc::clone(&server);
            let service = Arc::clone(&service);
            let shutdown = Arc::clone(&shutdown);
            let handle = thread::Builder::new()
                .name(format!("hearth-http-{}", i))
                .spawn(move || worker_loop(&server, &service, &shutdown))?;
            handles.push(handle);
        }

        info!(target: "hearth::api", addr = %addr, workers = handles.len(), "HTTP server listening");
        Ok(HttpServer {
            server,
            workers: handles,
            shutdown,
            addr,
        })
    }

    /// The bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting requests and wait for the workers
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for _ in &self.workers {
            self.server.unblock();
        }
        for handle in self.workers {
            if handle.join().is_err() {
                warn!(target: "hearth::api", "HTTP worker panicked");
            }
        }
        info!(target: "hearth::api", addr = %self.addr, "HTTP server stopped");
    }
}

fn worker_loop(server: &Server, service: &Service, shutdown: &AtomicBool) {
    loop {
        match server.recv() {
            Ok(request) => serve(request, service),
            Err(e) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                warn!(target: "hearth::api", error = %e, "Failed to accept request");
            }
        }
    }
}

fn serve(mut request: Request, service: &Service) {
    let mut api = ApiRequest::new(request.method().clone(), request.url());
    api.headers = request
        .headers()
        .iter()
        .map(|h| (h.field.as_str().as_str().to_string(), h.value.as_str().to_string()))
        .collect();

    let mut body = Vec::new();
    let response = match request
        .as_reader()
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut body)
    {
        Ok(n) if n as u64 > MAX_BODY_BYTES => ApiResponse::text(413, "body too large"),
        Ok(_) => {
            api.body = body;
            handle(service, &api)
        }
        Err(e) => {
            debug!(target: "hearth::api", error = %e, "Failed to read request body");
            ApiResponse::text(400, "unreadable body")
        }
    };

    if let Err(e) = request.respond(into_tiny(response)) {
        debug!(target: "hearth::api", error = %e, "Failed to write response");
    }
}

fn into_tiny(response: ApiResponse) -> Response<std::io::Cursor<Vec<u8>>> {
    let mut out = Response::from_data(response.body).with_status_code(response.status);
    if let Ok(header) = Header::from_bytes("Content-Type", response.content_type) {
        out = out.with_header(header);
    }
    for (name, value) in response.headers {
        if let Ok(header) = Header::from_bytes(name, value.as_bytes()) {
            out = out.with_header(header);
        }
    }
    out
}
