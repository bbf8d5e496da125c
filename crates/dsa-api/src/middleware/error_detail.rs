//! # Development Error Detail
//!
//! In development mode, error responses gain a `stack` field holding the
//! `Debug` rendering of the [`AppError`](crate::error::AppError) that
//! produced them. The error itself leaves an [`ErrorContext`] in the
//! response extensions; this layer is the only place that reads it.
//! Outside development the layer passes responses through untouched.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use crate::error::{AppError, ErrorContext};
use crate::middleware::MAX_BODY_BYTES;

/// Install with `from_fn_with_state(config.development, error_detail_middleware)`.
pub async fn error_detail_middleware(
    State(development): State<bool>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if !development {
        return response;
    }
    let Some(ErrorContext(stack)) = response.extensions().get::<ErrorContext>().cloned() else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return AppError::internal(format!("error body unreadable: {e}")).into_response();
        }
    };

    let enriched = match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(mut map)) => {
            map.insert("stack".to_string(), Value::String(stack));
            serde_json::to_vec(&Value::Object(map)).ok()
        }
        _ => None,
    };

    match enriched {
        Some(body) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(body))
        }
        None => Response::from_parts(parts, Body::from(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use axum::body::Bytes;
    use http_body_util::{BodyExt, Full, Limited};
    use tower::ServiceExt;

    fn test_app(development: bool) -> Router {
        Router::new()
            .route(
                "/broken",
                get(|| async {
                    let body = Limited::new(Full::new(Bytes::from_static(b"truncated stream")), 2);
                    let mut response = Response::new(Body::new(body));
                    *response.status_mut() = StatusCode::BAD_REQUEST;
                    response
                        .extensions_mut()
                        .insert(ErrorContext("BadRequest".to_string()));
                    response
                }),
            )
            .route(
                "/fail",
                get(|| async { Err::<(), _>(AppError::internal("pool exhausted")) }),
            )
            .route("/ok", get(|| async { "fine" }))
            .layer(from_fn_with_state(development, error_detail_middleware))
    }

    async fn body_of(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(HttpRequest::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn development_adds_stack() {
        let (status, bytes) = body_of(test_app(true), "/fail").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Internal server error");
        assert!(body["stack"].as_str().unwrap().contains("pool exhausted"));
    }

    #[tokio::test]
    async fn production_omits_stack() {
        let (_, bytes) = body_of(test_app(false), "/fail").await;
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body.get("stack").is_none());
    }

    #[tokio::test]
    async fn success_responses_untouched() {
        let (status, bytes) = body_of(test_app(true), "/ok").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"fine");
    }

    #[tokio::test]
    async fn unreadable_error_body_becomes_explicit_500() {
        let (status, bytes) = body_of(test_app(true), "/broken").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "INTERNAL_ERROR");
    }
}
