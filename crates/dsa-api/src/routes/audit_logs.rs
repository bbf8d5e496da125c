//! # Audit Log Routes
//!
//! Read access to the audit trail, restricted to the caller's own
//! application.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use dsa_core::{Field, Rule, Schema};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::AuditRecord;
use crate::auth::AuthContext;
use crate::error::AppError;
use crate::extractors::{RequestSchema, ValidatedPath, ValidatedQuery};
use crate::routes::protected;
use crate::state::AppState;

/// Page size when `limit` is absent.
pub const DEFAULT_LIMIT: i64 = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogPath {
    pub application_id: Uuid,
}

impl RequestSchema for AuditLogPath {
    fn schema() -> Schema {
        Schema::new().field(Field::required("applicationId", Rule::Uuid))
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub limit: Option<i64>,
}

impl RequestSchema for AuditLogQuery {
    fn schema() -> Schema {
        Schema::new().field(Field::optional("limit", Rule::Integer { min: 1, max: 100 }))
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditLogResponse {
    pub success: bool,
    pub count: usize,
    pub logs: Vec<AuditRecord>,
}

/// Build the audit log router.
pub fn router(state: &AppState) -> Router<AppState> {
    Router::new().route(
        "/api/audit-logs/:applicationId",
        protected(get(list_audit_logs), state),
    )
}

/// GET /api/audit-logs/{applicationId}: Newest-first audit records.
#[utoipa::path(
    get,
    path = "/api/audit-logs/{applicationId}",
    params(
        ("applicationId" = Uuid, Path, description = "Application ID"),
        ("limit" = Option<i64>, Query, description = "Page size, 1 to 100"),
    ),
    responses(
        (status = 200, description = "Audit records", body = AuditLogResponse),
        (status = 403, description = "Not the caller's application", body = crate::error::ErrorBody),
        (status = 404, description = "Application not found", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "audit"
)]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    ctx: AuthContext,
    ValidatedPath(path): ValidatedPath<AuditLogPath>,
    ValidatedQuery(query): ValidatedQuery<AuditLogQuery>,
) -> Result<Json<AuditLogResponse>, AppError> {
    let application = state
        .applications
        .get(&path.application_id)
        .ok_or_else(|| {
            AppError::not_found("Application not found").with_code("APPLICATION_NOT_FOUND")
        })?;
    if application.phone != ctx.phone {
        tracing::warn!(
            user_id = %ctx.user_id,
            application_id = %application.id,
            "audit log access to another applicant's application"
        );
        return Err(AppError::forbidden("You do not have access to this application"));
    }

    let limit = usize::try_from(query.limit.unwrap_or(DEFAULT_LIMIT)).unwrap_or(1);
    let logs = state
        .audit
        .sink()
        .list_for_application(application.id, limit)
        .await?;

    Ok(Json(AuditLogResponse {
        success: true,
        count: logs.len(),
        logs,
    }))
}
