//! Transport-neutral request and response
//!
//! The router works on these instead of `tiny_http` types so it can be
//! driven directly in tests.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tiny_http::Method;

use hearth_core::{Error, Result};

/// Header carrying a write's time-to-live in seconds
pub const TTL_HEADER: &str = "TTL";

/// Response header naming the resolution tier (`direct` / `default`)
pub const RESOLUTION_HEADER: &str = "X-Hearth-Resolution";

/// Response header carrying the version of the returned value
pub const VERSION_HEADER: &str = "X-Hearth-Version";

/// An inbound request
#[derive(Clone)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Raw request target (path and optional query)
    pub url: String,
    /// Header name/value pairs
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Vec<u8>,
}

impl ApiRequest {
    /// A request with no headers and an empty body
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        ApiRequest {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Path without the query string
    pub fn path(&self) -> &str {
        match self.url.split_once('?') {
            Some((path, _)) => path,
            None => &self.url,
        }
    }

    /// First header named `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The `TTL` header as a duration; absent means no expiry
    pub fn ttl(&self) -> Result<Option<Duration>> {
        let raw = match self.header(TTL_HEADER) {
            Some(raw) => raw.trim(),
            None => return Ok(None),
        };
        match raw.parse::<u64>() {
            Ok(0) => Ok(None),
            Ok(secs) => Ok(Some(Duration::from_secs(secs))),
            Err(_) => Err(Error::invalid_input(format!(
                "TTL header must be whole seconds, got '{}'",
                raw
            ))),
        }
    }
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bodies may carry secret payloads
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// An outbound response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Content type
    pub content_type: &'static str,
    /// Extra headers
    pub headers: Vec<(&'static str, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// A plain-text response
    pub fn text(status: u16, body: impl Into<Vec<u8>>) -> Self {
        ApiResponse {
            status,
            content_type: "text/plain; charset=utf-8",
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// A raw byte response
    pub fn bytes(body: Vec<u8>) -> Self {
        ApiResponse {
            status: 200,
            content_type: "application/octet-stream",
            headers: Vec::new(),
            body,
        }
    }

    /// An indented JSON response
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        let body = serde_json::to_vec_pretty(value)?;
        Ok(ApiResponse {
            status: 200,
            content_type: "application/json",
            headers: Vec::new(),
            body,
        })
    }

    /// `200 ok`
    pub fn ok() -> Self {
        Self::text(200, "ok")
    }

    /// Add a header
    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Body as UTF-8, replacing invalid sequences
    pub fn body_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
