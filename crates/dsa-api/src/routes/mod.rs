//! # API Route Modules
//!
//! Route modules for the onboarding API surface, all under `/api`:
//!
//! - `auth`: phone OTP login, refresh rotation, logout and the current user.
//! - `application`: the caller's onboarding application.
//! - `kyc`: Aadhaar and PAN verification steps.
//! - `bank`: bank account verification step.
//! - `company`: registrar (CIN/LLPIN) verification step for companies.
//! - `audit_logs`: the audit trail of the caller's own application.
//!
//! Each module exposes `router(&AppState)`, which attaches the per-route
//! guards (tier limiter, authentication) as route layers. The general
//! limiter, optional authentication and the audit layer are applied to the
//! merged `/api` router in [`crate::app`].

pub mod application;
pub mod audit_logs;
pub mod auth;
pub mod bank;
pub mod company;
pub mod kyc;

use axum::middleware::from_fn_with_state;
use axum::routing::MethodRouter;
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{authenticate, AuthContext};
use crate::error::AppError;
use crate::middleware::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::state::{AppState, ApplicationRecord};

/// Wrap a route in a tier limiter.
pub(crate) fn limited(route: MethodRouter<AppState>, limiter: &RateLimiter) -> MethodRouter<AppState> {
    route.route_layer(from_fn_with_state(limiter.clone(), rate_limit_middleware))
}

/// Require a valid access token. Layers added before this one run after it.
pub(crate) fn protected(route: MethodRouter<AppState>, state: &AppState) -> MethodRouter<AppState> {
    route.route_layer(from_fn_with_state(state.tokens.clone(), authenticate))
}

/// Response for a completed verification step.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepResponse {
    pub success: bool,
    pub message: String,
    pub application: ApplicationRecord,
}

impl StepResponse {
    pub fn new(message: impl Into<String>, application: ApplicationRecord) -> Self {
        Self {
            success: true,
            message: message.into(),
            application,
        }
    }
}

/// The caller's current application.
///
/// The identity's back-reference wins over the token claim, which may
/// predate a newer application. An application owned by another phone is
/// never returned.
pub(crate) fn current_application(
    state: &AppState,
    ctx: &AuthContext,
) -> Result<ApplicationRecord, AppError> {
    let application_id = state
        .identities
        .get(&ctx.user_id)
        .and_then(|identity| identity.application_id)
        .or(ctx.application_id);

    application_id
        .and_then(|id| state.applications.get(&id))
        .filter(|application| application.phone == ctx.phone)
        .ok_or_else(|| {
            AppError::not_found("No onboarding application found").with_code("APPLICATION_NOT_FOUND")
        })
}

/// Apply a verification step to an open application and persist it.
///
/// The open check is repeated under the store lock so that a step racing a
/// terminal transition cannot land.
pub(crate) async fn apply_step(
    state: &AppState,
    application: &ApplicationRecord,
    step: impl FnOnce(&mut ApplicationRecord),
) -> Result<ApplicationRecord, AppError> {
    let updated = state
        .applications
        .try_update(&application.id, |record| -> Result<ApplicationRecord, AppError> {
            record.ensure_open()?;
            step(record);
            Ok(record.clone())
        })
        .unwrap_or_else(|| {
            Err(AppError::not_found("No onboarding application found")
                .with_code("APPLICATION_NOT_FOUND"))
        })?;
    state.persist_application(&updated).await?;
    Ok(updated)
}
