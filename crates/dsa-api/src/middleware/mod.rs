//! # Middleware Modules
//!
//! Tower middleware layers for the API service.

pub mod client_ip;
pub mod error_detail;
pub mod rate_limit;
pub mod tracing_layer;

/// Largest request or response body any middleware will buffer (1 MiB).
pub const MAX_BODY_BYTES: usize = 1024 * 1024;
