//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI spec,
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Registers the bearer scheme referenced by protected operations.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Assembled OpenAPI spec for the entire API surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "DSA Onboarding API",
        version = "0.1.0",
        description = "Phone OTP login, KYC, bank and company verification for Direct Selling Agent onboarding."
    ),
    paths(
        // Auth
        crate::routes::auth::send_otp,
        crate::routes::auth::verify_otp,
        crate::routes::auth::refresh_token,
        crate::routes::auth::logout,
        crate::routes::auth::me,
        // Application
        crate::routes::application::get_application,
        // Verification steps
        crate::routes::kyc::verify_aadhaar,
        crate::routes::kyc::verify_pan,
        crate::routes::bank::verify_bank,
        crate::routes::company::verify_company,
        // Audit
        crate::routes::audit_logs::list_audit_logs,
    ),
    components(schemas(
        // State record types
        crate::state::UserView,
        crate::state::ApplicationRecord,
        crate::state::KycDetails,
        crate::state::AadhaarDetails,
        crate::state::PanDetails,
        crate::state::BankDetails,
        crate::state::CompanyDetails,
        crate::audit::AuditRecord,
        crate::audit::AuditCategory,
        crate::audit::AuditOutcome,
        // Error types
        crate::error::ErrorBody,
        // Auth DTOs
        crate::routes::auth::SendOtpRequest,
        crate::routes::auth::SendOtpResponse,
        crate::routes::auth::VerifyOtpRequest,
        crate::routes::auth::LoginResponse,
        crate::routes::auth::RefreshTokenRequest,
        crate::routes::auth::RefreshTokenResponse,
        crate::routes::auth::MessageResponse,
        crate::routes::auth::MeResponse,
        // Step DTOs
        crate::routes::StepResponse,
        crate::routes::application::ApplicationResponse,
        crate::routes::kyc::AadhaarVerifyRequest,
        crate::routes::kyc::PanVerifyRequest,
        crate::routes::bank::BankVerifyRequest,
        crate::routes::company::CompanyVerifyRequest,
        crate::routes::audit_logs::AuditLogResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Phone OTP login and credential lifecycle"),
        (name = "application", description = "Onboarding application"),
        (name = "kyc", description = "Aadhaar and PAN verification"),
        (name = "bank", description = "Bank account verification"),
        (name = "company", description = "Registrar verification for companies"),
        (name = "audit", description = "Audit trail"),
    )
)]
pub struct ApiDoc;

/// Build the OpenAPI router.
///
/// Serves the OpenAPI JSON spec at `/openapi.json`.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json: Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_lists_every_route() {
        let spec = ApiDoc::openapi();
        let paths: Vec<&String> = spec.paths.paths.keys().collect();
        for expected in [
            "/api/auth/send-otp",
            "/api/auth/verify-otp",
            "/api/auth/refresh-token",
            "/api/auth/logout",
            "/api/auth/me",
            "/api/application",
            "/api/kyc/aadhaar/verify",
            "/api/kyc/pan/verify",
            "/api/bank/verify",
            "/api/company/verify",
            "/api/audit-logs/{applicationId}",
        ] {
            assert!(paths.iter().any(|p| p.as_str() == expected), "missing {expected}");
        }
    }

    #[test]
    fn bearer_scheme_registered() {
        let spec = ApiDoc::openapi();
        let components = spec.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
