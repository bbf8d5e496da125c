//! # dsa-api: Axum API Service for DSA Onboarding
//!
//! Multi-step onboarding backend for Direct Selling Agents: phone OTP
//! login, Aadhaar and PAN KYC, bank verification and company registrar
//! verification, tied together by an application lifecycle.
//!
//! ## API Surface
//!
//! | Prefix                | Module                        | Domain               |
//! |-----------------------|-------------------------------|----------------------|
//! | `/api/auth/*`         | [`routes::auth`]              | Login and credentials |
//! | `/api/application`    | [`routes::application`]       | Application status   |
//! | `/api/kyc/*`          | [`routes::kyc`]               | Aadhaar and PAN      |
//! | `/api/bank/*`         | [`routes::bank`]              | Bank account         |
//! | `/api/company/*`      | [`routes::company`]           | Registrar lookup     |
//! | `/api/audit-logs/*`   | [`routes::audit_logs`]        | Audit trail          |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → ClientAddr → MethodNotAllowed → ErrorDetail → Audit → OptionalAuth → GeneralLimit
//!            → [Authenticate → TierLimit] → Validation → Handler
//! ```
//!
//! Bracketed layers are attached per route. `/health` and `/openapi.json`
//! sit outside the `/api` layers.
//!
//! ## OpenAPI
//!
//! Generated via utoipa derive macros, served at `/openapi.json`.

pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod providers;
pub mod routes;
pub mod state;

use axum::http::{header, Method, StatusCode, Uri};
use axum::middleware::{from_fn_with_state, map_response};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::audit::audit_middleware;
use crate::auth::optional_authenticate;
use crate::error::{AppError, ErrorContext};
use crate::middleware::client_ip::client_addr_middleware;
use crate::middleware::error_detail::error_detail_middleware;
use crate::middleware::rate_limit::rate_limit_middleware;
use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .merge(routes::auth::router(&state))
        .merge(routes::application::router(&state))
        .merge(routes::kyc::router(&state))
        .merge(routes::bank::router(&state))
        .merge(routes::company::router(&state))
        .merge(routes::audit_logs::router(&state))
        .route_layer(from_fn_with_state(
            state.limiters.general.clone(),
            rate_limit_middleware,
        ))
        .route_layer(from_fn_with_state(state.tokens.clone(), optional_authenticate))
        .route_layer(from_fn_with_state(state.audit.clone(), audit_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(openapi::router())
        .merge(api)
        .fallback(route_not_found)
        .layer(from_fn_with_state(
            state.config.development,
            error_detail_middleware,
        ))
        .layer(map_response(method_not_allowed))
        .layer(from_fn_with_state(
            state.config.trusted_proxies,
            client_addr_middleware,
        ))
        .layer(middleware::tracing_layer::layer())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub success: bool,
    pub status: String,
    pub timestamp: String,
}

/// Liveness probe: Always 200 while the process is running.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn route_not_found(method: Method, uri: Uri) -> AppError {
    AppError::not_found(format!("Route {method} {} not found", uri.path()))
        .with_code("ROUTE_NOT_FOUND")
}

/// Replace the router's bare 405 with the standard error body. Headers set
/// on the way out (`Allow`, rate-limit counters) are kept.
async fn method_not_allowed(method: Method, uri: Uri, response: Response) -> Response {
    if response.status() != StatusCode::METHOD_NOT_ALLOWED
        || response.extensions().get::<ErrorContext>().is_some()
    {
        return response;
    }
    let mut headers = response.headers().clone();
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::CONTENT_TYPE);

    let mut replaced = AppError::method_not_allowed(format!(
        "Method {method} not allowed on {}",
        uri.path()
    ))
    .into_response();
    replaced.headers_mut().extend(headers);
    replaced
}
