//! # Auth Routes
//!
//! Phone OTP login and credential lifecycle:
//!
//! | Route | Guard |
//! |---|---|
//! | `POST /api/auth/send-otp` | otp limiter |
//! | `POST /api/auth/verify-otp` | auth limiter |
//! | `POST /api/auth/refresh-token` | auth limiter |
//! | `POST /api/auth/logout` | authenticate |
//! | `GET /api/auth/me` | authenticate |
//!
//! The login handlers attach the [`AuthContext`] they just established to
//! their response so the audit trail records the new actor.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use dsa_core::rules::mask_tail;
use dsa_core::{CompanySubType, CrossRule, EntityType, Field, Rule, Schema};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::otp::OtpError;
use crate::auth::AuthContext;
use crate::error::AppError;
use crate::extractors::{RequestSchema, ValidatedJson};
use crate::routes::{limited, protected};
use crate::state::{AppState, ApplicationRecord, IdentityRecord, UserView};

// ── DTOs ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendOtpRequest {
    /// 10-digit Indian mobile number.
    pub phone: String,
    pub email: Option<String>,
    #[schema(value_type = Option<String>)]
    pub entity_type: Option<EntityType>,
    #[schema(value_type = Option<String>)]
    pub company_sub_type: Option<CompanySubType>,
}

impl RequestSchema for SendOtpRequest {
    fn schema() -> Schema {
        Schema::new()
            .field(Field::required("phone", Rule::Phone))
            .field(Field::optional("email", Rule::Email))
            .field(Field::optional("entityType", Rule::EntityType))
            .field(Field::optional("companySubType", Rule::CompanySubType))
            .cross(CrossRule::SubTypeRequiredForCompany)
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendOtpResponse {
    pub success: bool,
    pub message: String,
    pub phone: String,
    /// Present only when OTP simulation is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    pub phone: String,
    /// 6-digit code.
    pub otp: String,
    #[schema(value_type = String)]
    pub entity_type: EntityType,
    #[schema(value_type = Option<String>)]
    pub company_sub_type: Option<CompanySubType>,
}

impl RequestSchema for VerifyOtpRequest {
    fn schema() -> Schema {
        Schema::new()
            .field(Field::required("phone", Rule::Phone))
            .field(Field::required("otp", Rule::Otp))
            .field(Field::required("entityType", Rule::EntityType))
            .field(Field::optional("companySubType", Rule::CompanySubType))
            .cross(CrossRule::SubTypeRequiredForCompany)
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserView,
    pub application: ApplicationRecord,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

impl RequestSchema for RefreshTokenRequest {
    fn schema() -> Schema {
        Schema::new().field(Field::required("refreshToken", Rule::Token))
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenResponse {
    pub success: bool,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub success: bool,
    pub user: UserView,
    pub application: Option<ApplicationRecord>,
}

// ── Router ──────────────────────────────────────────────────────────────────

/// Build the auth router.
pub fn router(state: &AppState) -> Router<AppState> {
    let limiters = &state.limiters;
    Router::new()
        .route("/api/auth/send-otp", limited(post(send_otp), &limiters.otp))
        .route("/api/auth/verify-otp", limited(post(verify_otp), &limiters.auth))
        .route("/api/auth/refresh-token", limited(post(refresh_token), &limiters.auth))
        .route("/api/auth/logout", protected(post(logout), state))
        .route("/api/auth/me", protected(get(me), state))
}

fn with_actor(body: impl IntoResponse, identity: &IdentityRecord) -> Response {
    let mut response = body.into_response();
    response.extensions_mut().insert(AuthContext {
        user_id: identity.id,
        application_id: identity.application_id,
        phone: identity.phone.clone(),
    });
    response
}

// ── Handlers ────────────────────────────────────────────────────────────────

/// POST /api/auth/send-otp: Issue a login code.
#[utoipa::path(
    post,
    path = "/api/auth/send-otp",
    request_body = SendOtpRequest,
    responses(
        (status = 200, description = "OTP issued", body = SendOtpResponse),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
        (status = 429, description = "Too many OTP requests", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
pub async fn send_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<SendOtpRequest>,
) -> Result<Json<SendOtpResponse>, AppError> {
    let now = Utc::now();
    let (identity, created) = state.identities.find_or_insert_with(
        |identity| identity.phone == req.phone,
        || {
            let identity = IdentityRecord::new(req.phone.clone(), now);
            (identity.id, identity)
        },
    );

    let mut code = String::new();
    let identity = state
        .identities
        .update(&identity.id, |identity| {
            if identity.email.is_none() {
                identity.email = req.email.clone();
            }
            code = identity.otp.issue(&req.phone, now);
            identity.updated_at = now;
        })
        .ok_or_else(|| AppError::internal(format!("identity {} vanished", identity.id)))?;
    state.persist_identity(&identity).await?;

    if let Err(e) = state.otp_delivery.deliver(&req.phone, &code).await {
        tracing::error!(phone = %mask_tail(&req.phone), error = %e, "OTP delivery failed");
        return Err(AppError::internal(e.to_string()));
    }

    tracing::info!(
        user_id = %identity.id,
        phone = %mask_tail(&req.phone),
        new_identity = created,
        "OTP issued"
    );

    Ok(Json(SendOtpResponse {
        success: true,
        message: "OTP sent successfully".to_string(),
        phone: req.phone,
        otp: state.config.otp_simulate.then_some(code),
    }))
}

/// POST /api/auth/verify-otp: Exchange a code for a credential pair.
///
/// Creates the caller's application on first login; later logins reuse the
/// open one.
#[utoipa::path(
    post,
    path = "/api/auth/verify-otp",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 401, description = "OTP rejected", body = crate::error::ErrorBody),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
pub async fn verify_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyOtpRequest>,
) -> Result<Response, AppError> {
    let now = Utc::now();
    let identity = state
        .identities
        .find(|identity| identity.phone == req.phone)
        .ok_or(OtpError::NotRequested)?;

    let checked = state
        .identities
        .try_update(&identity.id, |identity| {
            let result = identity.otp.verify(&req.phone, &req.otp, now);
            identity.updated_at = now;
            match result {
                Ok(()) => Ok(identity.clone()),
                Err(e) => Err((e, identity.clone())),
            }
        })
        .ok_or(OtpError::NotRequested)?;

    if let Err((e, snapshot)) = checked {
        tracing::warn!(
            user_id = %snapshot.id,
            phone = %mask_tail(&req.phone),
            attempts = snapshot.otp.attempts,
            reason = e.code(),
            "OTP verification failed"
        );
        state.persist_identity(&snapshot).await?;
        return Err(e.into());
    }

    let (application, created) = state.applications.find_or_insert_with(
        |application| application.phone == req.phone && !application.status.is_terminal(),
        || {
            let application =
                ApplicationRecord::new(req.phone.clone(), req.entity_type, req.company_sub_type, now);
            (application.id, application)
        },
    );
    if created {
        state.persist_application(&application).await?;
        tracing::info!(application_id = %application.id, entity_type = application.entity_type.as_str(), "application created");
    }

    state
        .identities
        .update(&identity.id, |identity| {
            identity.application_id = Some(application.id);
            identity.is_verified = true;
            identity.last_login_at = Some(now);
            identity.updated_at = now;
        })
        .ok_or_else(|| AppError::internal(format!("identity {} vanished", identity.id)))?;

    let (pair, identity) = state.tokens.issue(identity.id)?;
    state.persist_identity(&identity).await?;

    tracing::info!(user_id = %identity.id, application_id = %application.id, "login succeeded");

    let body = Json(LoginResponse {
        success: true,
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        user: identity.view(),
        application,
    });
    Ok(with_actor(body, &identity))
}

/// POST /api/auth/refresh-token: Rotate the refresh credential.
#[utoipa::path(
    post,
    path = "/api/auth/refresh-token",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "Credentials rotated", body = RefreshTokenResponse),
        (status = 401, description = "Refresh token invalid or expired", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshTokenRequest>,
) -> Result<Response, AppError> {
    let (pair, identity) = state.tokens.rotate(&req.refresh_token).map_err(|e| {
        tracing::warn!(reason = %e, "refresh rejected");
        e
    })?;
    state.persist_identity(&identity).await?;

    let body = Json(RefreshTokenResponse {
        success: true,
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    });
    Ok(with_actor(body, &identity))
}

/// POST /api/auth/logout: Revoke the refresh credential.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn logout(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> Result<Json<MessageResponse>, AppError> {
    if let Some(identity) = state.tokens.revoke(ctx.user_id) {
        state.persist_identity(&identity).await?;
    }
    tracing::info!(user_id = %ctx.user_id, "logged out");
    Ok(Json(MessageResponse {
        success: true,
        message: "Logged out successfully".to_string(),
    }))
}

/// GET /api/auth/me: Current user and application.
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorBody),
        (status = 404, description = "User no longer exists", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn me(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> Result<Json<MeResponse>, AppError> {
    let identity = state
        .identities
        .get(&ctx.user_id)
        .ok_or_else(|| AppError::not_found("User not found").with_code("USER_NOT_FOUND"))?;
    let application = identity
        .application_id
        .and_then(|id| state.applications.get(&id));
    Ok(Json(MeResponse {
        success: true,
        user: identity.view(),
        application,
    }))
}
