//! # Company Routes
//!
//! Registrar verification for company entities: a CIN for private limited
//! and one-person companies, an LLPIN for LLPs, optionally a GSTIN.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use dsa_core::{ApplicationStatus, CompanySubType, CrossRule, EntityType, Field, Rule, Schema};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::AuthContext;
use crate::error::AppError;
use crate::extractors::{RequestSchema, ValidatedJson};
use crate::providers::CompanyQuery;
use crate::routes::{apply_step, current_application, limited, protected, StepResponse};
use crate::state::{AppState, CompanyDetails};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompanyVerifyRequest {
    #[schema(value_type = String)]
    pub company_sub_type: CompanySubType,
    pub cin: Option<String>,
    pub llpin: Option<String>,
    pub gstin: Option<String>,
    pub company_name: Option<String>,
}

impl RequestSchema for CompanyVerifyRequest {
    fn schema() -> Schema {
        Schema::new()
            .field(Field::required("companySubType", Rule::CompanySubType))
            .field(Field::optional("cin", Rule::Cin))
            .field(Field::optional("llpin", Rule::Llpin))
            .field(Field::optional("gstin", Rule::Gstin))
            .field(Field::optional("companyName", Rule::Text { min: 2, max: 200 }))
            .cross(CrossRule::RegistrarIdMatchesSubType)
    }
}

/// Build the company router.
pub fn router(state: &AppState) -> Router<AppState> {
    Router::new().route(
        "/api/company/verify",
        protected(limited(post(verify_company), &state.limiters.external), state),
    )
}

/// POST /api/company/verify: Verify registrar details.
#[utoipa::path(
    post,
    path = "/api/company/verify",
    request_body = CompanyVerifyRequest,
    responses(
        (status = 200, description = "Company verified", body = StepResponse),
        (status = 400, description = "Not a company, sub-type differs from the application, or rejected by the registrar", body = crate::error::ErrorBody),
        (status = 409, description = "Application closed", body = crate::error::ErrorBody),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "company"
)]
pub async fn verify_company(
    State(state): State<AppState>,
    ctx: AuthContext,
    ValidatedJson(req): ValidatedJson<CompanyVerifyRequest>,
) -> Result<Json<StepResponse>, AppError> {
    let application = current_application(&state, &ctx)?;
    application.ensure_open()?;
    if application.entity_type != EntityType::Company {
        return Err(AppError::bad_request(format!(
            "Company verification does not apply to a {} entity",
            application.entity_type.as_str()
        ))
        .with_code("NOT_A_COMPANY"));
    }
    if let Some(chosen) = application.company_sub_type {
        if chosen != req.company_sub_type {
            return Err(AppError::bad_request(format!(
                "Application was opened as {}, not {}",
                chosen.as_str(),
                req.company_sub_type.as_str()
            ))
            .with_code("SUBTYPE_MISMATCH"));
        }
    }

    // Only the identifier the sub-type uses is sent to the registrar.
    let (cin, llpin) = if req.company_sub_type.uses_llpin() {
        (None, req.llpin)
    } else {
        (req.cin, None)
    };
    let query = CompanyQuery {
        sub_type: req.company_sub_type,
        cin,
        llpin,
        gstin: req.gstin,
        company_name: req.company_name,
    };
    let matched = state.provider.verify_company(&query).await?;

    let now = Utc::now();
    let updated = apply_step(&state, &application, |record| {
        record.company_sub_type = Some(query.sub_type);
        record.company = Some(CompanyDetails {
            sub_type: query.sub_type,
            cin: query.cin.clone(),
            llpin: query.llpin.clone(),
            gstin: query.gstin.clone(),
            registered_name: matched.registered_name,
            verified_at: now,
        });
        record.completed_steps.company = true;
        record.advance(ApplicationStatus::CompanyVerified, now);
    })
    .await?;

    tracing::info!(
        application_id = %updated.id,
        sub_type = query.sub_type.as_str(),
        "company verified"
    );
    Ok(Json(StepResponse::new("Company verified successfully", updated)))
}
