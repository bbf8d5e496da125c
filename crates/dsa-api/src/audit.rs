//! # Audit Trail
//!
//! Every `/api` request outside the exclusion list produces one
//! append-only [`AuditRecord`]: who called, what they called, the outcome,
//! the redacted request and response payloads, and the latency.
//!
//! The middleware buffers both bodies and rebuilds the response
//! byte-for-byte, so clients see exactly what the handler produced. The
//! write itself is handed to a detached task; sink failures are logged and
//! never reach the caller.
//!
//! ## Category
//!
//! The first of `/auth`, `/kyc`, `/bank`, `/document`, `/agreement`,
//! `/admin` that the path contains names the category; anything else is
//! `system`.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Query, RawPathParams, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use dsa_core::redact;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::error::AppError;
use crate::middleware::client_ip::request_client_ip;
use crate::middleware::MAX_BODY_BYTES;

/// Path prefixes that are never audited.
pub const EXCLUDED_PREFIXES: [&str; 4] = ["/health", "/favicon.ico", "/static", "/openapi.json"];

/// Whether requests to `path` are skipped by the audit layer.
pub fn is_excluded(path: &str) -> bool {
    path == "/api" || path == "/api/" || EXCLUDED_PREFIXES.iter().any(|p| path.starts_with(p))
}

// ── Record ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Auth,
    Kyc,
    Bank,
    Document,
    Agreement,
    Admin,
    System,
}

impl AuditCategory {
    const RULES: [(&'static str, AuditCategory); 6] = [
        ("/auth", Self::Auth),
        ("/kyc", Self::Kyc),
        ("/bank", Self::Bank),
        ("/document", Self::Document),
        ("/agreement", Self::Agreement),
        ("/admin", Self::Admin),
    ];

    /// Category of a request path; first matching rule wins.
    pub fn for_path(path: &str) -> Self {
        Self::RULES
            .iter()
            .find(|(needle, _)| path.contains(needle))
            .map(|(_, category)| *category)
            .unwrap_or(Self::System)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Kyc => "kyc",
            Self::Bank => "bank",
            Self::Document => "document",
            Self::Agreement => "agreement",
            Self::Admin => "admin",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Self {
        Self::RULES
            .iter()
            .map(|(_, c)| *c)
            .find(|c| c.as_str() == value)
            .unwrap_or(Self::System)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditOutcome {
    pub fn from_status(status: StatusCode) -> Self {
        if status.as_u16() >= 400 {
            Self::Failure
        } else {
            Self::Success
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// One audited request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub application_id: Option<Uuid>,
    pub phone: Option<String>,
    /// `"{METHOD} {path}"`.
    pub action: String,
    pub category: AuditCategory,
    pub outcome: AuditOutcome,
    pub status_code: u16,
    /// Redacted `{params, query, body}`.
    #[schema(value_type = Object)]
    pub request: Value,
    /// Redacted response body.
    #[schema(value_type = Object)]
    pub response: Value,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Sinks ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AuditSinkError {
    #[error("audit database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<AuditSinkError> for AppError {
    fn from(err: AuditSinkError) -> Self {
        AppError::internal(err.to_string())
    }
}

/// Destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync + Debug {
    async fn write(&self, record: &AuditRecord) -> Result<(), AuditSinkError>;

    /// Most recent first, at most `limit` records.
    async fn list_for_application(
        &self,
        application_id: Uuid,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, AuditSinkError>;
}

/// Process-local sink, used when no database is configured and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    records: Arc<RwLock<Vec<AuditRecord>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far, in write order.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.read().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, record: &AuditRecord) -> Result<(), AuditSinkError> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn list_for_application(
        &self,
        application_id: Uuid,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, AuditSinkError> {
        Ok(self
            .records
            .read()
            .iter()
            .rev()
            .filter(|r| r.application_id == Some(application_id))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Postgres-backed sink writing to `audit_logs`.
#[derive(Debug, Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn write(&self, record: &AuditRecord) -> Result<(), AuditSinkError> {
        crate::db::audit::insert(&self.pool, record).await?;
        Ok(())
    }

    async fn list_for_application(
        &self,
        application_id: Uuid,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, AuditSinkError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(crate::db::audit::list_for_application(&self.pool, application_id, limit).await?)
    }
}

// ── Recorder ────────────────────────────────────────────────────────────────

/// Fire-and-forget front of an [`AuditSink`].
#[derive(Debug, Clone)]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<dyn AuditSink> {
        &self.sink
    }

    /// Persist `record` on a detached task. Never blocks the caller.
    pub fn record(&self, record: AuditRecord) {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            if let Err(e) = sink.write(&record).await {
                tracing::error!(
                    action = %record.action,
                    error = %e,
                    "failed to persist audit record"
                );
            }
        });
    }
}

// ── Middleware ──────────────────────────────────────────────────────────────

fn body_to_value(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(format!("[non-JSON body, {} bytes]", bytes.len())))
}

fn header_string(request: &Request, name: header::HeaderName) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Install with `from_fn_with_state(state.audit.clone(), audit_middleware)`.
pub async fn audit_middleware(
    State(recorder): State<AuditRecorder>,
    path_params: Option<RawPathParams>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if is_excluded(&path) {
        return next.run(request).await;
    }

    let started = Instant::now();
    let action = format!("{} {}", request.method(), path);

    let params: Map<String, Value> = path_params
        .as_ref()
        .map(|p| {
            p.iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect()
        })
        .unwrap_or_default();
    let query: Map<String, Value> = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .map(|Query(q)| q.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
        .unwrap_or_default();
    let ip_address = request_client_ip(request.extensions()).map(|ip| ip.to_string());
    let user_agent = header_string(&request, header::USER_AGENT);
    let request_actor = request.extensions().get::<AuthContext>().cloned();

    let (parts, body) = request.into_parts();
    let (request_body, response) = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => {
            let request_body = body_to_value(&bytes);
            let request = Request::from_parts(parts, Body::from(bytes));
            (request_body, next.run(request).await)
        }
        Err(_) => (
            Value::String(format!("[body over {MAX_BODY_BYTES} bytes]")),
            AppError::payload_too_large("Request body too large").into_response(),
        ),
    };

    let actor = response
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .or(request_actor);

    let (parts, body) = response.into_parts();
    let (response, response_body) = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => {
            let response_body = body_to_value(&bytes);
            (Response::from_parts(parts, Body::from(bytes)), response_body)
        }
        Err(e) => {
            tracing::error!(action = %action, error = %e, "failed to buffer response for audit");
            let err = AppError::internal(format!("response body unreadable: {e}"));
            (err.into_response(), Value::Null)
        }
    };
    let status = response.status();

    let outcome = AuditOutcome::from_status(status);
    let error_message = match outcome {
        AuditOutcome::Success => None,
        AuditOutcome::Failure => response_body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| status.canonical_reason().map(str::to_string)),
    };

    recorder.record(AuditRecord {
        id: Uuid::new_v4(),
        user_id: actor.as_ref().map(|a| a.user_id),
        application_id: actor.as_ref().and_then(|a| a.application_id),
        phone: actor.map(|a| a.phone),
        category: AuditCategory::for_path(&path),
        action,
        outcome,
        status_code: status.as_u16(),
        request: redact(&json!({ "params": params, "query": query, "body": request_body })),
        response: redact(&response_body),
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        error_message,
        ip_address,
        user_agent,
        created_at: Utc::now(),
    });

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;
    use axum::middleware::from_fn_with_state;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use axum::body::Bytes;
    use axum::extract::ConnectInfo;
    use dsa_core::REDACTED;
    use http_body_util::{BodyExt, Full, Limited};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tower::ServiceExt;

    #[test]
    fn category_precedence() {
        assert_eq!(AuditCategory::for_path("/api/auth/send-otp"), AuditCategory::Auth);
        assert_eq!(AuditCategory::for_path("/api/kyc/digilocker"), AuditCategory::Kyc);
        assert_eq!(AuditCategory::for_path("/api/bank/verify"), AuditCategory::Bank);
        assert_eq!(AuditCategory::for_path("/api/documents/upload"), AuditCategory::Document);
        assert_eq!(AuditCategory::for_path("/api/agreement/sign"), AuditCategory::Agreement);
        assert_eq!(AuditCategory::for_path("/api/admin/apps"), AuditCategory::Admin);
        assert_eq!(AuditCategory::for_path("/api/company/verify"), AuditCategory::System);
        // "/auth" is checked before "/kyc".
        assert_eq!(AuditCategory::for_path("/api/kyc/auth-check"), AuditCategory::Kyc);
        assert_eq!(AuditCategory::for_path("/api/auth/kyc"), AuditCategory::Auth);
    }

    #[test]
    fn category_round_trips() {
        for c in [AuditCategory::Auth, AuditCategory::Admin, AuditCategory::System] {
            assert_eq!(AuditCategory::parse(c.as_str()), c);
        }
    }

    #[test]
    fn exclusions() {
        assert!(is_excluded("/health"));
        assert!(is_excluded("/health/ready"));
        assert!(is_excluded("/favicon.ico"));
        assert!(is_excluded("/static/app.js"));
        assert!(is_excluded("/api"));
        assert!(is_excluded("/api/"));
        assert!(!is_excluded("/api/auth/me"));
    }

    #[test]
    fn outcome_threshold() {
        assert_eq!(AuditOutcome::from_status(StatusCode::OK), AuditOutcome::Success);
        assert_eq!(AuditOutcome::from_status(StatusCode::FOUND), AuditOutcome::Success);
        assert_eq!(AuditOutcome::from_status(StatusCode::BAD_REQUEST), AuditOutcome::Failure);
    }

    fn test_app(sink: MemoryAuditSink) -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route(
                "/api/echo/:id",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({ "success": true, "echo": body, "accessToken": "abc" }))
                }),
            )
            .route(
                "/api/fail",
                get(|| async { AppError::forbidden("Not your application") }),
            )
            .route(
                "/api/broken",
                get(|| async {
                    let body = Limited::new(Full::new(Bytes::from_static(b"truncated stream")), 2);
                    Response::new(Body::new(body))
                }),
            )
            .route_layer(from_fn_with_state(
                AuditRecorder::new(Arc::new(sink)),
                audit_middleware,
            ))
    }

    async fn wait_for(sink: &MemoryAuditSink, n: usize) -> Vec<AuditRecord> {
        for _ in 0..50 {
            let records = sink.records();
            if records.len() >= n {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sink.records()
    }

    #[tokio::test]
    async fn records_redacted_payloads_without_changing_response() {
        let sink = MemoryAuditSink::new();
        let app = test_app(sink.clone());
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/api/echo/42?source=web")
                    .header("content-type", "application/json")
                    .header("user-agent", "test-agent")
                    .body(Body::from(r#"{"password":"x","nested":{"token":"y","keep":1}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let client_view: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(client_view["accessToken"], "abc");
        assert_eq!(client_view["echo"]["password"], "x");

        let records = wait_for(&sink, 1).await;
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.action, "POST /api/echo/42");
        assert_eq!(record.category, AuditCategory::System);
        assert_eq!(record.outcome, AuditOutcome::Success);
        assert_eq!(record.request["params"]["id"], "42");
        assert_eq!(record.request["query"]["source"], "web");
        assert_eq!(record.request["body"]["password"], REDACTED);
        assert_eq!(record.request["body"]["nested"]["token"], REDACTED);
        assert_eq!(record.request["body"]["nested"]["keep"], 1);
        assert_eq!(record.response["accessToken"], REDACTED);
        assert_eq!(record.user_agent.as_deref(), Some("test-agent"));
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn failures_capture_error_message() {
        let sink = MemoryAuditSink::new();
        let app = test_app(sink.clone());
        let response = app
            .oneshot(HttpRequest::builder().uri("/api/fail").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let records = wait_for(&sink, 1).await;
        assert_eq!(records[0].outcome, AuditOutcome::Failure);
        assert_eq!(records[0].status_code, 403);
        assert_eq!(records[0].error_message.as_deref(), Some("Not your application"));
    }

    #[tokio::test]
    async fn oversized_request_is_413_and_audited() {
        let sink = MemoryAuditSink::new();
        let app = test_app(sink.clone());
        let peer: SocketAddr = "192.0.2.10:5555".parse().unwrap();
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/api/echo/1")
                    .header("content-type", "application/json")
                    .extension(ConnectInfo(peer))
                    .body(Body::from(vec![b' '; MAX_BODY_BYTES + 1]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");

        let records = wait_for(&sink, 1).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status_code, 413);
        assert_eq!(records[0].outcome, AuditOutcome::Failure);
        assert_eq!(records[0].error_message.as_deref(), Some("Request body too large"));
        assert_eq!(records[0].ip_address.as_deref(), Some("192.0.2.10"));
    }

    #[tokio::test]
    async fn unreadable_response_becomes_explicit_500() {
        let sink = MemoryAuditSink::new();
        let app = test_app(sink.clone());
        let response = app
            .oneshot(HttpRequest::builder().uri("/api/broken").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "INTERNAL_ERROR");

        let records = wait_for(&sink, 1).await;
        assert_eq!(records[0].status_code, 500);
    }

    #[tokio::test]
    async fn health_is_not_audited() {
        let sink = MemoryAuditSink::new();
        let app = test_app(sink.clone());
        let response = app
            .oneshot(HttpRequest::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sink.records().is_empty());
    }

    #[derive(Debug)]
    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn write(&self, _record: &AuditRecord) -> Result<(), AuditSinkError> {
            Err(AuditSinkError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn list_for_application(
            &self,
            _application_id: Uuid,
            _limit: usize,
        ) -> Result<Vec<AuditRecord>, AuditSinkError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn sink_failure_never_reaches_client() {
        let app = Router::new()
            .route("/api/ping", get(|| async { "pong" }))
            .route_layer(from_fn_with_state(
                AuditRecorder::new(Arc::new(FailingSink)),
                audit_middleware,
            ));
        let response = app
            .oneshot(HttpRequest::builder().uri("/api/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"pong");
    }

    #[tokio::test]
    async fn memory_sink_lists_newest_first_per_application() {
        let sink = MemoryAuditSink::new();
        let app_id = Uuid::new_v4();
        for i in 0..3 {
            let record = AuditRecord {
                id: Uuid::new_v4(),
                user_id: None,
                application_id: Some(app_id),
                phone: None,
                action: format!("GET /api/{i}"),
                category: AuditCategory::System,
                outcome: AuditOutcome::Success,
                status_code: 200,
                request: Value::Null,
                response: Value::Null,
                duration_ms: 1,
                error_message: None,
                ip_address: None,
                user_agent: None,
                created_at: Utc::now(),
            };
            sink.write(&record).await.unwrap();
        }
        let listed = sink.list_for_application(app_id, 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].action, "GET /api/2");
        assert!(sink.list_for_application(Uuid::new_v4(), 10).await.unwrap().is_empty());
    }
}
