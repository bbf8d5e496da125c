//! # Validated Extractors
//!
//! Axum extractors that run a request target (body, query string or path
//! parameters) through a [`Schema`] before the handler sees it. The handler
//! receives the sanitised payload deserialised into its DTO; any violation
//! is rejected with 422 `VALIDATION_ERROR` and the handler never runs.
//!
//! ```ignore
//! async fn handler(ValidatedJson(req): ValidatedJson<SendOtpRequest>) -> Result<..., AppError> {
//!     // req.phone is trimmed and format-checked
//! }
//! ```

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::request::Parts;
use axum::Json;
use dsa_core::Schema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::AppError;

/// Request DTOs that declare the schema their raw payload must satisfy.
pub trait RequestSchema {
    fn schema() -> Schema;
}

/// Validate `raw` against `T`'s schema and deserialise the sanitised output.
pub fn validate_into<T>(raw: &Value) -> Result<T, AppError>
where
    T: RequestSchema + DeserializeOwned,
{
    let sanitized = T::schema().validate(raw)?;
    // The schema and the DTO are declared side by side; a mismatch is a bug.
    serde_json::from_value(Value::Object(sanitized))
        .map_err(|e| AppError::internal(format!("sanitised payload does not fit DTO: {e}")))
}

fn string_map_to_value(map: HashMap<String, String>) -> Value {
    Value::Object(
        map.into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect::<Map<String, Value>>(),
    )
}

/// JSON body validated against `T::schema()`.
///
/// An empty body counts as an empty object so every required field is
/// reported. A body that is not JSON is a 400 `INVALID_JSON`.
#[derive(Debug, Clone)]
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: RequestSchema + DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::bad_request(e.body_text()).with_code("INVALID_JSON"))?;
        let raw = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            let Json(value) = Json::<Value>::from_bytes(&bytes)?;
            value
        };
        validate_into(&raw).map(Self)
    }
}

/// Query string validated against `T::schema()`.
#[derive(Debug, Clone)]
pub struct ValidatedQuery<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequestParts<S> for ValidatedQuery<T>
where
    S: Send + Sync,
    T: RequestSchema + DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(map) = Query::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::bad_request(e.body_text()).with_code("INVALID_QUERY"))?;
        validate_into(&string_map_to_value(map)).map(Self)
    }
}

/// Path parameters validated against `T::schema()`.
#[derive(Debug, Clone)]
pub struct ValidatedPath<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequestParts<S> for ValidatedPath<T>
where
    S: Send + Sync,
    T: RequestSchema + DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(map) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::bad_request(e.body_text()).with_code("INVALID_PATH"))?;
        validate_into(&string_map_to_value(map)).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::routing::{get, post};
    use axum::Router;
    use dsa_core::{Field, Rule};
    use http_body_util::BodyExt;
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Debug, Deserialize)]
    struct PanBody {
        pan: String,
        name: Option<String>,
    }

    impl RequestSchema for PanBody {
        fn schema() -> Schema {
            Schema::new()
                .field(Field::required("pan", Rule::Pan))
                .field(Field::optional("name", Rule::Text { min: 2, max: 100 }))
        }
    }

    #[derive(Debug, Deserialize)]
    struct IdPath {
        id: String,
    }

    impl RequestSchema for IdPath {
        fn schema() -> Schema {
            Schema::new().field(Field::required("id", Rule::Uuid))
        }
    }

    #[derive(Debug, Deserialize)]
    struct LimitQuery {
        limit: Option<i64>,
    }

    impl RequestSchema for LimitQuery {
        fn schema() -> Schema {
            Schema::new().field(Field::optional("limit", Rule::Integer { min: 1, max: 100 }))
        }
    }

    fn test_app() -> Router {
        Router::new()
            .route(
                "/pan",
                post(|ValidatedJson(body): ValidatedJson<PanBody>| async move {
                    format!("{}|{}", body.pan, body.name.unwrap_or_default())
                }),
            )
            .route(
                "/items/:id",
                get(|ValidatedPath(p): ValidatedPath<IdPath>| async move { p.id }),
            )
            .route(
                "/items",
                get(|ValidatedQuery(q): ValidatedQuery<LimitQuery>| async move {
                    q.limit.unwrap_or(20).to_string()
                }),
            )
    }

    async fn send(request: HttpRequest<Body>) -> (StatusCode, String) {
        let response = test_app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn post_json(uri: &str, body: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn body_is_sanitised_before_handler() {
        let (status, text) = send(post_json("/pan", r#"{"pan":" abcpx1234x ","name":"Asha"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "ABCPX1234X|Asha");
    }

    #[tokio::test]
    async fn invalid_body_is_422_with_details() {
        let (status, text) = send(post_json("/pan", r#"{"pan":"ABCPX1234","name":"A"}"#)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["details"].as_array().unwrap().len(), 2);
        assert_eq!(body["details"][0]["message"], "PAN must be exactly 10 characters");
    }

    #[tokio::test]
    async fn empty_body_reports_required_fields() {
        let (status, text) = send(post_json("/pan", "")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["details"][0]["field"], "pan");
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let (status, text) = send(post_json("/pan", "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["code"], "INVALID_JSON");
    }

    #[tokio::test]
    async fn path_params_are_validated() {
        let ok = HttpRequest::builder()
            .uri("/items/550E8400-E29B-41D4-A716-446655440000")
            .body(Body::empty())
            .unwrap();
        let (status, text) = send(ok).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "550e8400-e29b-41d4-a716-446655440000");

        let bad = HttpRequest::builder()
            .uri("/items/not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(bad).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn query_values_are_coerced() {
        let ok = HttpRequest::builder()
            .uri("/items?limit=5&junk=1")
            .body(Body::empty())
            .unwrap();
        let (status, text) = send(ok).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "5");

        let bad = HttpRequest::builder()
            .uri("/items?limit=500")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(bad).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
