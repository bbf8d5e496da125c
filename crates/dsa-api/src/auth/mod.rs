//! # Authentication
//!
//! Bearer-token guard for protected routes, plus the OTP and credential
//! machinery behind login.
//!
//! ## AuthContext
//!
//! Every authenticated request gets an [`AuthContext`] injected into the
//! request extensions. Handlers extract it via the `FromRequestParts` impl.
//! The guards also copy it into the response extensions, where the audit
//! layer (which runs outside them) picks up the actor.
//!
//! | Failure | Code |
//! |---|---|
//! | no `Authorization: Bearer` header | `NO_TOKEN` |
//! | bad signature, issuer or claims | `INVALID_TOKEN` |
//! | past expiry | `TOKEN_EXPIRED` |

pub mod otp;
pub mod token;

use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::auth::token::{AccessClaims, TokenService};
use crate::error::AppError;

// ── AuthContext ─────────────────────────────────────────────────────────────

/// Identity of the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub application_id: Option<Uuid>,
    pub phone: String,
}

impl From<AccessClaims> for AuthContext {
    fn from(claims: AccessClaims) -> Self {
        Self {
            user_id: claims.sub,
            application_id: claims.application_id,
            phone: claims.phone,
        }
    }
}

/// Extracts the context that [`authenticate`] injected into extensions.
/// Returns 401 if none is present.
#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for AuthContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| AppError::unauthorized("Authentication required").with_code("NO_TOKEN"))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Lower-case hex encoding.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Constant-time string comparison. Unequal lengths compare unequal
/// after a dummy comparison of the same cost.
pub(crate) fn constant_time_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

// ── Middleware ──────────────────────────────────────────────────────────────

/// Require a valid access token.
///
/// Install with `from_fn_with_state(state.tokens.clone(), authenticate)`.
pub async fn authenticate(
    State(tokens): State<TokenService>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(token) = bearer_token(request.headers()) else {
        tracing::warn!("authentication failed: missing bearer token");
        return Err(AppError::unauthorized("Access token is required").with_code("NO_TOKEN"));
    };

    let context = match tokens.verify_access(token) {
        Ok(claims) => AuthContext::from(claims),
        Err(e) => {
            tracing::warn!(reason = %e, "authentication failed");
            return Err(e);
        }
    };

    request.extensions_mut().insert(context.clone());
    let mut response = next.run(request).await;
    response.extensions_mut().insert(context);
    Ok(response)
}

/// Attach an [`AuthContext`] when a valid token is present; otherwise pass
/// the request through untouched.
pub async fn optional_authenticate(
    State(tokens): State<TokenService>,
    mut request: Request,
    next: Next,
) -> Response {
    let context = bearer_token(request.headers())
        .and_then(|token| tokens.verify_access(token).ok())
        .map(AuthContext::from);

    if let Some(context) = &context {
        request.extensions_mut().insert(context.clone());
    }
    let mut response = next.run(request).await;
    if let Some(context) = context {
        if response.extensions().get::<AuthContext>().is_none() {
            response.extensions_mut().insert(context);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::{IdentityRecord, Store};
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn tokens_with_identity() -> (TokenService, String) {
        let store = Store::new();
        let identity = IdentityRecord::new("9876543210", Utc::now());
        let id = identity.id;
        store.insert(id, identity);
        let tokens = TokenService::new(&AppConfig::default(), store);
        let (pair, _) = tokens.issue(id).unwrap();
        (tokens, pair.access_token)
    }

    fn protected_app(tokens: TokenService) -> Router {
        Router::new()
            .route("/me", get(|ctx: AuthContext| async move { ctx.phone }))
            .route_layer(from_fn_with_state(tokens, authenticate))
    }

    fn optional_app(tokens: TokenService) -> Router {
        Router::new()
            .route(
                "/any",
                get(|ctx: Option<axum::Extension<AuthContext>>| async move {
                    ctx.map(|axum::Extension(c)| c.phone)
                        .unwrap_or_else(|| "anonymous".to_string())
                }),
            )
            .route_layer(from_fn_with_state(tokens, optional_authenticate))
    }

    async fn call(app: Router, auth: Option<&str>) -> (StatusCode, String) {
        let mut builder = HttpRequest::builder().uri("/me");
        if let Some(value) = auth {
            builder = builder.header("Authorization", value);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn valid_token_reaches_handler() {
        let (tokens, access) = tokens_with_identity();
        let (status, body) = call(protected_app(tokens), Some(&format!("Bearer {access}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "9876543210");
    }

    #[tokio::test]
    async fn missing_header_is_no_token() {
        let (tokens, _) = tokens_with_identity();
        let (status, body) = call(protected_app(tokens), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("NO_TOKEN"));
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_no_token() {
        let (tokens, access) = tokens_with_identity();
        let (status, body) = call(protected_app(tokens), Some(&format!("Basic {access}"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("NO_TOKEN"));
    }

    #[tokio::test]
    async fn garbage_token_is_invalid() {
        let (tokens, _) = tokens_with_identity();
        let (status, body) = call(protected_app(tokens), Some("Bearer not.a.jwt")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("INVALID_TOKEN"));
    }

    #[tokio::test]
    async fn guard_copies_context_into_response() {
        let (tokens, access) = tokens_with_identity();
        let response = protected_app(tokens)
            .oneshot(
                HttpRequest::builder()
                    .uri("/me")
                    .header("Authorization", format!("Bearer {access}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let ctx = response.extensions().get::<AuthContext>().unwrap();
        assert_eq!(ctx.phone, "9876543210");
    }

    #[tokio::test]
    async fn optional_guard_passes_anonymous_and_invalid() {
        let (tokens, access) = tokens_with_identity();
        let app = optional_app(tokens);
        let send = |auth: Option<String>| {
            let app = app.clone();
            async move {
                let mut builder = HttpRequest::builder().uri("/any");
                if let Some(value) = auth {
                    builder = builder.header("Authorization", value);
                }
                let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
                let status = response.status();
                let bytes = response.into_body().collect().await.unwrap().to_bytes();
                (status, String::from_utf8(bytes.to_vec()).unwrap())
            }
        };
        assert_eq!(send(None).await, (StatusCode::OK, "anonymous".to_string()));
        assert_eq!(
            send(Some("Bearer junk".into())).await,
            (StatusCode::OK, "anonymous".to_string())
        );
        assert_eq!(
            send(Some(format!("Bearer {access}"))).await,
            (StatusCode::OK, "9876543210".to_string())
        );
    }

    #[test]
    fn constant_time_eq_behaviour() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn hex_encoding() {
        assert_eq!(to_hex(&[0x00, 0xab, 0xff]), "00abff");
    }
}
