//! # One-Time Passcodes
//!
//! Six-digit login codes bound to a phone number. Only
//! `sha256("{phone}:{code}")` is stored, with a 10 minute expiry and a
//! failed-attempt counter.
//!
//! Verification order:
//!
//! 1. attempts at the cap: `OTP_LOCKED`, whatever code was presented
//! 2. no code stored: `OTP_NOT_REQUESTED`
//! 3. expired: code cleared, `OTP_EXPIRED`
//! 4. mismatch: attempts incremented, `INVALID_OTP`; the code is cleared
//!    when attempts reach the cap
//! 5. match: code cleared and attempts reset
//!
//! Issuing a new code resets the counter, which is the only way out of a
//! lockout.

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::auth::to_hex;
use crate::error::AppError;

/// Failed verifications allowed before lockout.
pub const MAX_OTP_ATTEMPTS: u32 = 3;

/// Lifetime of an issued code.
pub fn otp_ttl() -> Duration {
    Duration::minutes(10)
}

/// Stored OTP state for one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OtpState {
    pub hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub attempts: u32,
}

/// Why a presented code was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OtpError {
    #[error("Too many failed attempts. Please request a new OTP")]
    Locked,
    #[error("No OTP has been requested for this number. Please request an OTP first")]
    NotRequested,
    #[error("OTP has expired. Please request a new OTP")]
    Expired,
    #[error("Invalid OTP. {remaining} attempt(s) remaining")]
    Invalid { remaining: u32 },
}

impl OtpError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Locked => "OTP_LOCKED",
            Self::NotRequested => "OTP_NOT_REQUESTED",
            Self::Expired => "OTP_EXPIRED",
            Self::Invalid { .. } => "INVALID_OTP",
        }
    }
}

impl From<OtpError> for AppError {
    fn from(err: OtpError) -> Self {
        AppError::unauthorized(err.to_string()).with_code(err.code())
    }
}

/// Uniformly random six-digit code.
pub fn generate_code() -> String {
    // Largest multiple of 10^6 below 2^32; rejecting above it removes modulo bias.
    const LIMIT: u32 = 4_294_000_000;
    loop {
        let n = OsRng.next_u32();
        if n < LIMIT {
            return format!("{:06}", n % 1_000_000);
        }
    }
}

/// Hex SHA-256 of `"{phone}:{code}"`.
pub fn hash_otp(phone: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(phone.as_bytes());
    hasher.update(b":");
    hasher.update(code.as_bytes());
    to_hex(&hasher.finalize())
}

impl OtpState {
    /// Store a fresh code and return it in clear for delivery.
    pub fn issue(&mut self, phone: &str, now: DateTime<Utc>) -> String {
        let code = generate_code();
        self.hash = Some(hash_otp(phone, &code));
        self.expires_at = Some(now + otp_ttl());
        self.attempts = 0;
        code
    }

    fn clear(&mut self) {
        self.hash = None;
        self.expires_at = None;
    }

    /// Check `code` and update the state. A successful check consumes the code.
    pub fn verify(&mut self, phone: &str, code: &str, now: DateTime<Utc>) -> Result<(), OtpError> {
        if self.attempts >= MAX_OTP_ATTEMPTS {
            return Err(OtpError::Locked);
        }
        let Some(stored) = self.hash.as_deref() else {
            return Err(OtpError::NotRequested);
        };
        if self.expires_at.map_or(true, |exp| exp <= now) {
            self.clear();
            return Err(OtpError::Expired);
        }

        let presented = hash_otp(phone, code);
        let matches: bool = presented.as_bytes().ct_eq(stored.as_bytes()).into();
        if !matches {
            self.attempts += 1;
            if self.attempts >= MAX_OTP_ATTEMPTS {
                self.clear();
            }
            return Err(OtpError::Invalid {
                remaining: MAX_OTP_ATTEMPTS.saturating_sub(self.attempts),
            });
        }

        self.clear();
        self.attempts = 0;
        Ok(())
    }
}

/// Channel that gets a code to the user.
#[async_trait]
pub trait OtpDelivery: Send + Sync + Debug {
    async fn deliver(&self, phone: &str, code: &str) -> Result<(), DeliveryError>;
}

#[derive(Debug, Error)]
#[error("OTP delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Default delivery: records the dispatch in the log without the code.
#[derive(Debug, Clone, Default)]
pub struct LogOtpDelivery;

#[async_trait]
impl OtpDelivery for LogOtpDelivery {
    async fn deliver(&self, phone: &str, _code: &str) -> Result<(), DeliveryError> {
        tracing::info!(phone = %dsa_core::rules::mask_tail(phone), "OTP dispatched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHONE: &str = "9876543210";

    fn issued(now: DateTime<Utc>) -> (OtpState, String) {
        let mut state = OtpState::default();
        let code = state.issue(PHONE, now);
        (state, code)
    }

    fn wrong(code: &str) -> String {
        let n: u32 = code.parse().unwrap();
        format!("{:06}", (n + 1) % 1_000_000)
    }

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn hash_binds_phone() {
        assert_ne!(hash_otp("9876543210", "123456"), hash_otp("9876543211", "123456"));
        assert_eq!(hash_otp(PHONE, "123456").len(), 64);
    }

    #[test]
    fn correct_code_is_single_use() {
        let now = Utc::now();
        let (mut state, code) = issued(now);
        assert_eq!(state.verify(PHONE, &code, now), Ok(()));
        assert_eq!(state.verify(PHONE, &code, now), Err(OtpError::NotRequested));
    }

    #[test]
    fn three_misses_then_lockout_even_with_correct_code() {
        let now = Utc::now();
        let (mut state, code) = issued(now);
        let bad = wrong(&code);
        assert_eq!(state.verify(PHONE, &bad, now), Err(OtpError::Invalid { remaining: 2 }));
        assert_eq!(state.verify(PHONE, &bad, now), Err(OtpError::Invalid { remaining: 1 }));
        assert_eq!(state.verify(PHONE, &bad, now), Err(OtpError::Invalid { remaining: 0 }));
        assert!(state.hash.is_none());
        assert_eq!(state.verify(PHONE, &code, now), Err(OtpError::Locked));
    }

    #[test]
    fn reissue_clears_lockout() {
        let now = Utc::now();
        let (mut state, code) = issued(now);
        for _ in 0..3 {
            let _ = state.verify(PHONE, &wrong(&code), now);
        }
        let fresh = state.issue(PHONE, now);
        assert_eq!(state.attempts, 0);
        assert_eq!(state.verify(PHONE, &fresh, now), Ok(()));
    }

    #[test]
    fn expired_code_is_cleared() {
        let now = Utc::now();
        let (mut state, code) = issued(now);
        let later = now + otp_ttl() + Duration::seconds(1);
        assert_eq!(state.verify(PHONE, &code, later), Err(OtpError::Expired));
        assert!(state.hash.is_none());
        assert_eq!(state.verify(PHONE, &code, later), Err(OtpError::NotRequested));
    }

    #[test]
    fn never_requested() {
        let mut state = OtpState::default();
        assert_eq!(
            state.verify(PHONE, "123456", Utc::now()),
            Err(OtpError::NotRequested)
        );
    }

    #[test]
    fn errors_map_to_unauthorized_codes() {
        use axum::http::StatusCode;
        let err = AppError::from(OtpError::Locked);
        assert_eq!(err.status_and_code(), (StatusCode::UNAUTHORIZED, "OTP_LOCKED"));
        let err = AppError::from(OtpError::Invalid { remaining: 1 });
        assert_eq!(err.status_and_code().1, "INVALID_OTP");
        assert!(err.to_string().contains("1 attempt"));
    }

    #[tokio::test]
    async fn log_delivery_succeeds() {
        assert!(LogOtpDelivery.deliver(PHONE, "123456").await.is_ok());
    }
}
