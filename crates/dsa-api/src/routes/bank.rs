//! # Bank Routes
//!
//! Bank account verification (penny-drop style, behind the provider trait).
//! Only the last four digits of the account number are kept.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use dsa_core::rules::mask_tail;
use dsa_core::{ApplicationStatus, Field, Rule, Schema};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::AuthContext;
use crate::error::AppError;
use crate::extractors::{RequestSchema, ValidatedJson};
use crate::routes::{apply_step, current_application, limited, protected, StepResponse};
use crate::state::{AppState, BankDetails};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BankVerifyRequest {
    pub account_number: String,
    pub ifsc: String,
    pub account_holder_name: Option<String>,
}

impl RequestSchema for BankVerifyRequest {
    fn schema() -> Schema {
        Schema::new()
            .field(Field::required("accountNumber", Rule::AccountNumber))
            .field(Field::required("ifsc", Rule::Ifsc))
            .field(Field::optional("accountHolderName", Rule::Text { min: 2, max: 100 }))
    }
}

/// Build the bank router.
pub fn router(state: &AppState) -> Router<AppState> {
    Router::new().route(
        "/api/bank/verify",
        protected(limited(post(verify_bank), &state.limiters.external), state),
    )
}

/// POST /api/bank/verify: Verify the payout bank account.
#[utoipa::path(
    post,
    path = "/api/bank/verify",
    request_body = BankVerifyRequest,
    responses(
        (status = 200, description = "Bank account verified", body = StepResponse),
        (status = 400, description = "Provider rejected the account", body = crate::error::ErrorBody),
        (status = 409, description = "Application closed", body = crate::error::ErrorBody),
        (status = 422, description = "Validation failed", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "bank"
)]
pub async fn verify_bank(
    State(state): State<AppState>,
    ctx: AuthContext,
    ValidatedJson(req): ValidatedJson<BankVerifyRequest>,
) -> Result<Json<StepResponse>, AppError> {
    let application = current_application(&state, &ctx)?;
    application.ensure_open()?;

    let matched = state
        .provider
        .verify_bank_account(&req.account_number, &req.ifsc, req.account_holder_name.as_deref())
        .await?;

    let now = Utc::now();
    let updated = apply_step(&state, &application, |record| {
        record.bank = Some(BankDetails {
            masked_account_number: mask_tail(&req.account_number),
            ifsc: req.ifsc.clone(),
            account_holder_name: matched.account_holder_name,
            bank_name: matched.bank_name,
            verified_at: now,
        });
        record.completed_steps.bank = true;
        record.advance(ApplicationStatus::BankVerified, now);
    })
    .await?;

    tracing::info!(application_id = %updated.id, ifsc = %req.ifsc, "bank account verified");
    Ok(Json(StepResponse::new("Bank account verified successfully", updated)))
}
