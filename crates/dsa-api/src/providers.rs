//! # Verification Providers
//!
//! Third-party KYC, bank and registrar checks sit behind
//! [`VerificationProvider`]. The service ships with [`SimulatedProvider`],
//! which accepts well-formed identifiers and echoes the names it is given.

use std::fmt::Debug;

use async_trait::async_trait;
use dsa_core::CompanySubType;
use thiserror::Error;

use crate::error::AppError;

/// Provider failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider answered and refused the identifier.
    #[error("{0}")]
    Rejected(String),
    /// The provider could not be reached or answered nonsense.
    #[error("verification provider unavailable: {0}")]
    Unavailable(String),
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected(reason) => {
                AppError::bad_request(reason).with_code("VERIFICATION_FAILED")
            }
            ProviderError::Unavailable(_) => AppError::internal(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMatch {
    /// Name on record with the issuing authority.
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankMatch {
    pub account_holder_name: Option<String>,
    pub bank_name: Option<String>,
}

/// Registrar lookup input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyQuery {
    pub sub_type: CompanySubType,
    pub cin: Option<String>,
    pub llpin: Option<String>,
    pub gstin: Option<String>,
    pub company_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyMatch {
    pub registered_name: Option<String>,
}

#[async_trait]
pub trait VerificationProvider: Send + Sync + Debug {
    async fn verify_aadhaar(
        &self,
        number: &str,
        name: Option<&str>,
    ) -> Result<IdentityMatch, ProviderError>;

    async fn verify_pan(&self, pan: &str, name: Option<&str>) -> Result<IdentityMatch, ProviderError>;

    async fn verify_bank_account(
        &self,
        account_number: &str,
        ifsc: &str,
        holder_name: Option<&str>,
    ) -> Result<BankMatch, ProviderError>;

    async fn verify_company(&self, query: &CompanyQuery) -> Result<CompanyMatch, ProviderError>;
}

/// In-process stand-in for the real providers.
///
/// Aadhaar numbers never begin with 0 or 1, so those are refused; the bank
/// name is derived from well-known IFSC prefixes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedProvider;

fn bank_for_ifsc(ifsc: &str) -> Option<&'static str> {
    match ifsc.get(..4)? {
        "HDFC" => Some("HDFC Bank"),
        "SBIN" => Some("State Bank of India"),
        "ICIC" => Some("ICICI Bank"),
        "UTIB" => Some("Axis Bank"),
        _ => None,
    }
}

#[async_trait]
impl VerificationProvider for SimulatedProvider {
    async fn verify_aadhaar(
        &self,
        number: &str,
        name: Option<&str>,
    ) -> Result<IdentityMatch, ProviderError> {
        if number.starts_with('0') || number.starts_with('1') {
            return Err(ProviderError::Rejected(
                "Aadhaar number could not be verified".to_string(),
            ));
        }
        Ok(IdentityMatch {
            name: name.map(str::to_string),
        })
    }

    async fn verify_pan(&self, _pan: &str, name: Option<&str>) -> Result<IdentityMatch, ProviderError> {
        Ok(IdentityMatch {
            name: name.map(str::to_string),
        })
    }

    async fn verify_bank_account(
        &self,
        _account_number: &str,
        ifsc: &str,
        holder_name: Option<&str>,
    ) -> Result<BankMatch, ProviderError> {
        Ok(BankMatch {
            account_holder_name: holder_name.map(str::to_string),
            bank_name: bank_for_ifsc(ifsc).map(str::to_string),
        })
    }

    async fn verify_company(&self, query: &CompanyQuery) -> Result<CompanyMatch, ProviderError> {
        Ok(CompanyMatch {
            registered_name: query.company_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn aadhaar_leading_digit_rejected() {
        let p = SimulatedProvider;
        assert!(p.verify_aadhaar("234512341234", Some("Asha")).await.is_ok());
        assert!(matches!(
            p.verify_aadhaar("123412341234", None).await,
            Err(ProviderError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn bank_name_from_ifsc() {
        let p = SimulatedProvider;
        let m = p.verify_bank_account("12345678", "SBIN0001234", Some("Asha")).await.unwrap();
        assert_eq!(m.bank_name.as_deref(), Some("State Bank of India"));
        assert_eq!(m.account_holder_name.as_deref(), Some("Asha"));
        let m = p.verify_bank_account("12345678", "KKBK0001234", None).await.unwrap();
        assert!(m.bank_name.is_none());
    }

    #[test]
    fn errors_translate() {
        let err = AppError::from(ProviderError::Rejected("no".into()));
        assert_eq!(err.status_and_code(), (StatusCode::BAD_REQUEST, "VERIFICATION_FAILED"));
        let err = AppError::from(ProviderError::Unavailable("timeout".into()));
        assert!(!err.is_operational());
    }
}
