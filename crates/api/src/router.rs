//! Route table and handlers
//!
//! | Method   | Path                                   | Operation           |
//! |----------|----------------------------------------|---------------------|
//! | GET      | `/badger/{key}`, `/value/{key}`        | resolve_general     |
//! | PUT/POST | `/badger/{key}`, `/value/{key}`        | assign_general      |
//! | GET      | `/streamr/{prefix}`, `/stream/{prefix}`| export_prefix       |
//! | GET      | `/secret/{name}`                       | resolve_secret      |
//! | PUT/POST | `/secret/{name}`                       | assign_secret       |
//! | GET      | `/provisioning/{secrets,services,networks}` | listings       |
//! | PUT/POST | `/provisioning/services/{name}`        | provision_worker    |
//! | DELETE   | `/provisioning/services/{name}`        | remove_worker       |
//! | GET      | `/health`                              | liveness            |
//!
//! Path parameters are percent-decoded and may contain `/`.

use std::borrow::Cow;

use tiny_http::Method;
use tracing::{debug, error, warn};

use hearth_core::{Error, Result, WriteOptions};
use hearth_engine::{Resolution, Service};

use crate::request::{ApiRequest, ApiResponse, RESOLUTION_HEADER, VERSION_HEADER};

/// A matched route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Liveness probe
    Health,
    /// Read a general key
    GetValue(String),
    /// Write a general key
    PutValue(String),
    /// Export a prefix
    Export(String),
    /// Read a secret
    GetSecret(String),
    /// Write a secret
    PutSecret(String),
    /// List external secrets
    ListSecrets,
    /// List services
    ListServices,
    /// List networks
    ListNetworks,
    /// Create a worker service
    CreateService(String),
    /// Delete a worker service
    DeleteService(String),
}

/// Why a request matched no route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    /// Unknown path
    NotFound,
    /// Known path, unsupported method
    MethodNotAllowed,
    /// Path parameter is not valid percent-encoded UTF-8
    BadEncoding,
}

fn decode(raw: &str) -> std::result::Result<String, RouteError> {
    urlencoding::decode(raw)
        .map(Cow::into_owned)
        .map_err(|_| RouteError::BadEncoding)
}

fn is_read(method: &Method) -> bool {
    matches!(method, Method::Get | Method::Head)
}

fn is_write(method: &Method) -> bool {
    matches!(method, Method::Put | Method::Post)
}

impl Route {
    /// Match `method` and `path` against the route table
    pub fn parse(method: &Method, path: &str) -> std::result::Result<Route, RouteError> {
        let path = path.strip_prefix('/').unwrap_or(path);
        if path == "health" {
            return if is_read(method) {
                Ok(Route::Health)
            } else {
                Err(RouteError::MethodNotAllowed)
            };
        }

        let (head, rest) = path.split_once('/').ok_or(RouteError::NotFound)?;
        match head {
            "badger" | "value" => {
                let key = decode(rest)?;
                if is_read(method) {
                    Ok(Route::GetValue(key))
                } else if is_write(method) {
                    Ok(Route::PutValue(key))
                } else {
                    Err(RouteError::MethodNotAllowed)
                }
            }
            "streamr" | "stream" => {
                if is_read(method) {
                    Ok(Route::Export(decode(rest)?))
                } else {
                    Err(RouteError::MethodNotAllowed)
                }
            }
            "secret" => {
                let name = decode(rest)?;
                if is_read(method) {
                    Ok(Route::GetSecret(name))
                } else if is_write(method) {
                    Ok(Route::PutSecret(name))
                } else {
                    Err(RouteError::MethodNotAllowed)
                }
            }
            "provisioning" => Self::parse_provisioning(method, rest),
            _ => Err(RouteError::NotFound),
        }
    }

    fn parse_provisioning(method: &Method, rest: &str) -> std::result::Result<Route, RouteError> {
        let (collection, name) = match rest.split_once('/') {
            Some((collection, name)) => (collection, Some(name)),
            None => (rest, None),
        };
        match (collection, name) {
            ("secrets", None) if is_read(method) => Ok(Route::ListSecrets),
            ("networks", None) if is_read(method) => Ok(Route::ListNetworks),
            ("services", None) if is_read(method) => Ok(Route::ListServices),
            ("services", Some(name)) if is_write(method) => Ok(Route::CreateService(decode(name)?)),
            ("services", Some(name)) if *method == Method::Delete => {
                Ok(Route::DeleteService(decode(name)?))
            }
            ("secrets" | "networks" | "services", _) => Err(RouteError::MethodNotAllowed),
            _ => Err(RouteError::NotFound),
        }
    }
}

/// HTTP status for a service error
pub fn status_for(err: &Error) -> u16 {
    match err {
        Error::NotFound { .. } => 404,
        Error::Forbidden { .. } => 403,
        Error::InvalidInput(_) => 400,
        _ => 500,
    }
}

fn error_response(route: &Route, err: Error) -> ApiResponse {
    let status = status_for(&err);
    match status {
        403 => {
            warn!(target: "hearth::api", route = ?route, error = %err, "Forbidden");
            ApiResponse::text(status, "forbidden")
        }
        404 => ApiResponse::text(status, "not found"),
        400 => ApiResponse::text(status, err.to_string()),
        _ => {
            error!(target: "hearth::api", route = ?route, error = %err, "Request failed");
            ApiResponse::text(status, "internal error")
        }
    }
}

/// Serve one request against `service`
pub fn handle(service: &Service, request: &ApiRequest) -> ApiResponse {
    let route = match Route::parse(&request.method, request.path()) {
        Ok(route) => route,
        Err(RouteError::NotFound) => return ApiResponse::text(404, "not found"),
        Err(RouteError::MethodNotAllowed) => return ApiResponse::text(405, "method not allowed"),
        Err(RouteError::BadEncoding) => return ApiResponse::text(400, "invalid path encoding"),
    };

    let response = match dispatch(service, &route, request) {
        Ok(response) => response,
        Err(err) => error_response(&route, err),
    };
    debug!(
        target: "hearth::api",
        method = %request.method,
        route = ?route,
        status = response.status,
        "Handled"
    );
    response
}

fn dispatch(service: &Service, route: &Route, request: &ApiRequest) -> Result<ApiResponse> {
    match route {
        Route::Health => Ok(ApiResponse::ok()),
        Route::GetValue(key) => match service.resolve_general(key.as_bytes())? {
            Resolution::Absent => Err(Error::not_found(key)),
            resolution => {
                let tier = resolution.outcome();
                let value = resolution
                    .into_value()
                    .ok_or_else(|| Error::not_found(key))?;
                Ok(ApiResponse::bytes(value.value)
                    .with_header(RESOLUTION_HEADER, tier)
                    .with_header(VERSION_HEADER, value.version.to_string()))
            }
        },
        Route::PutValue(key) => {
            let options = WriteOptions {
                ttl: request.ttl()?,
                user_meta: 0,
            };
            let version = service.assign_general(key.as_bytes(), &request.body, options)?;
            Ok(ApiResponse::ok().with_header(VERSION_HEADER, version.to_string()))
        }
        Route::Export(prefix) => {
            let document = service.export_prefix(prefix.as_bytes())?;
            Ok(ApiResponse::json(&document)?)
        }
        Route::GetSecret(name) => {
            let value = service.resolve_secret(name)?;
            Ok(ApiResponse::bytes(value.value)
                .with_header(VERSION_HEADER, value.version.to_string()))
        }
        Route::PutSecret(name) => {
            let assignment = service.assign_secret(name, &request.body)?;
            Ok(ApiResponse::text(200, assignment.response_body())
                .with_header(VERSION_HEADER, assignment.version().to_string()))
        }
        Route::ListSecrets => ApiResponse::json(&service.list_secrets()?),
        Route::ListServices => ApiResponse::json(&service.list_services()?),
        Route::ListNetworks => ApiResponse::json(&service.list_networks()?),
        Route::CreateService(name) => {
            let image = String::from_utf8_lossy(&request.body);
            let id = service.provision_worker(name, image.trim())?;
            Ok(ApiResponse::text(200, id))
        }
        Route::DeleteService(name) => {
            service.remove_worker(name)?;
            Ok(ApiResponse::ok())
        }
    }
}
