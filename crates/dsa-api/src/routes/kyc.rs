//! # KYC Routes
//!
//! Aadhaar and PAN verification. Both steps run behind authentication and
//! the external-call limiter, call the [`VerificationProvider`] and record
//! the result on the caller's application.
//!
//! The fourth character of a PAN encodes the holder type and must agree
//! with the application's entity:
//!
//! | Entity | Holder |
//! |---|---|
//! | individual, proprietorship | `P` |
//! | partnership, llp | `F` |
//! | pvt_ltd, opc | `C` |
//!
//! [`VerificationProvider`]: crate::providers::VerificationProvider

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use dsa_core::rules::mask_tail;
use dsa_core::{ApplicationStatus, CompanySubType, EntityType, Field, Rule, Schema};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::AuthContext;
use crate::error::AppError;
use crate::extractors::{RequestSchema, ValidatedJson};
use crate::routes::{apply_step, current_application, limited, protected, StepResponse};
use crate::state::{AadhaarDetails, AppState, PanDetails};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AadhaarVerifyRequest {
    /// 12 digits.
    pub aadhaar_number: String,
    pub name: Option<String>,
}

impl RequestSchema for AadhaarVerifyRequest {
    fn schema() -> Schema {
        Schema::new()
            .field(Field::required("aadhaarNumber", Rule::Aadhaar))
            .field(Field::optional("name", Rule::Text { min: 2, max: 100 }))
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PanVerifyRequest {
    /// Upper-cased before validation.
    pub pan: String,
    pub name: Option<String>,
}

impl RequestSchema for PanVerifyRequest {
    fn schema() -> Schema {
        Schema::new()
            .field(Field::required("pan", Rule::Pan))
            .field(Field::optional("name", Rule::Text { min: 2, max: 100 }))
    }
}

/// Build the KYC router.
pub fn router(state: &AppState) -> Router<AppState> {
    let external = &state.limiters.external;
    Router::new()
        .route(
            "/api/kyc/aadhaar/verify",
            protected(limited(post(verify_aadhaar), external), state),
        )
        .route(
            "/api/kyc/pan/verify",
            protected(limited(post(verify_pan), external), state),
        )
}

/// PAN holder-type letter expected for an entity.
pub fn expected_pan_holder(entity: EntityType, sub_type: Option<CompanySubType>) -> char {
    match (entity, sub_type) {
        (EntityType::Individual | EntityType::Proprietorship, _) => 'P',
        (EntityType::Partnership, _) | (EntityType::Company, Some(CompanySubType::Llp)) => 'F',
        (EntityType::Company, _) => 'C',
    }
}

/// POST /api/kyc/aadhaar/verify: Verify the applicant's Aadhaar.
#[utoipa::path(
    post,
    path = "/api/kyc/aadhaar/verify",
    request_body = AadhaarVerifyRequest,
    responses(
        (status = 200, description = "Aadhaar verified", body = StepResponse),
        (status = 400, description = "Provider rejected the number", body = crate::error::ErrorBody),
        (status = 409, description = "Application closed", body = crate::error::ErrorBody),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "kyc"
)]
pub async fn verify_aadhaar(
    State(state): State<AppState>,
    ctx: AuthContext,
    ValidatedJson(req): ValidatedJson<AadhaarVerifyRequest>,
) -> Result<Json<StepResponse>, AppError> {
    let application = current_application(&state, &ctx)?;
    application.ensure_open()?;

    let matched = state
        .provider
        .verify_aadhaar(&req.aadhaar_number, req.name.as_deref())
        .await?;

    let now = Utc::now();
    let updated = apply_step(&state, &application, |record| {
        record.kyc.aadhaar = Some(AadhaarDetails {
            masked_number: mask_tail(&req.aadhaar_number),
            name: matched.name,
            verified_at: now,
        });
        record.completed_steps.aadhaar = true;
        record.advance(ApplicationStatus::KycVerified, now);
    })
    .await?;

    tracing::info!(
        application_id = %updated.id,
        aadhaar = %mask_tail(&req.aadhaar_number),
        "Aadhaar verified"
    );
    Ok(Json(StepResponse::new("Aadhaar verified successfully", updated)))
}

/// POST /api/kyc/pan/verify: Verify the applicant's PAN.
#[utoipa::path(
    post,
    path = "/api/kyc/pan/verify",
    request_body = PanVerifyRequest,
    responses(
        (status = 200, description = "PAN verified", body = StepResponse),
        (status = 400, description = "PAN does not fit the entity or was rejected", body = crate::error::ErrorBody),
        (status = 409, description = "Application closed", body = crate::error::ErrorBody),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "kyc"
)]
pub async fn verify_pan(
    State(state): State<AppState>,
    ctx: AuthContext,
    ValidatedJson(req): ValidatedJson<PanVerifyRequest>,
) -> Result<Json<StepResponse>, AppError> {
    let application = current_application(&state, &ctx)?;
    application.ensure_open()?;

    let expected = expected_pan_holder(application.entity_type, application.company_sub_type);
    if req.pan.chars().nth(3) != Some(expected) {
        return Err(AppError::bad_request(format!(
            "PAN holder type does not match a {} entity",
            application.entity_type.as_str()
        ))
        .with_code("PAN_ENTITY_MISMATCH"));
    }

    let matched = state.provider.verify_pan(&req.pan, req.name.as_deref()).await?;

    let now = Utc::now();
    let updated = apply_step(&state, &application, |record| {
        record.kyc.pan = Some(PanDetails {
            number: req.pan.clone(),
            name: matched.name,
            verified_at: now,
        });
        record.completed_steps.pan = true;
        record.advance(ApplicationStatus::PanVerified, now);
    })
    .await?;

    tracing::info!(application_id = %updated.id, "PAN verified");
    Ok(Json(StepResponse::new("PAN verified successfully", updated)))
}
