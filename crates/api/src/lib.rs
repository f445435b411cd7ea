//! HTTP surface for Hearth
//!
//! - `router`: route table, handlers and error-to-status mapping. Pure: takes
//!   an `ApiRequest` and a `Service`, returns an `ApiResponse`.
//! - `server`: `tiny_http` listener with a fixed worker pool.
//!
//! ## Status mapping
//!
//! | Error                    | Status |
//! |--------------------------|--------|
//! | NotFound                 | 404    |
//! | Forbidden                | 403    |
//! | InvalidInput             | 400    |
//! | anything else            | 500    |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod request;
pub mod router;
pub mod server;

pub use request::{ApiRequest, ApiResponse, RESOLUTION_HEADER, TTL_HEADER, VERSION_HEADER};
pub use router::{handle, status_for, Route, RouteError};
pub use server::{HttpServer, MAX_BODY_BYTES};
