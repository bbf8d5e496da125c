//! # Application Routes
//!
//! Read access to the caller's onboarding application.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::AuthContext;
use crate::error::AppError;
use crate::routes::{current_application, protected};
use crate::state::{AppState, ApplicationRecord};

#[derive(Debug, Serialize, ToSchema)]
pub struct ApplicationResponse {
    pub success: bool,
    pub application: ApplicationRecord,
}

/// Build the application router.
pub fn router(state: &AppState) -> Router<AppState> {
    Router::new().route("/api/application", protected(get(get_application), state))
}

/// GET /api/application: The caller's current application.
#[utoipa::path(
    get,
    path = "/api/application",
    responses(
        (status = 200, description = "Application found", body = ApplicationResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorBody),
        (status = 404, description = "No application", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "application"
)]
pub async fn get_application(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> Result<Json<ApplicationResponse>, AppError> {
    let application = current_application(&state, &ctx)?;
    Ok(Json(ApplicationResponse {
        success: true,
        application,
    }))
}
