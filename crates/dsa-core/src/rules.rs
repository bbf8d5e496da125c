//! # Identifier Rules
//!
//! Format checks for the Indian regulatory identifiers collected during
//! onboarding. Every predicate expects already-normalised input: callers
//! upper-case PAN, IFSC, CIN, LLPIN and GSTIN before checking. The
//! validation engine in [`crate::validation`] does that for request payloads.

use std::sync::LazyLock;

use regex::Regex;

fn compile(pattern: &str) -> Regex {
    // Patterns are compile-time literals; a failure here is a programming error
    // caught by the unit tests below.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid identifier pattern {pattern}: {e}"))
}

static PHONE: LazyLock<Regex> = LazyLock::new(|| compile(r"^[6-9][0-9]{9}$"));
static OTP: LazyLock<Regex> = LazyLock::new(|| compile(r"^[0-9]{6}$"));
static AADHAAR: LazyLock<Regex> = LazyLock::new(|| compile(r"^[0-9]{12}$"));
static PAN: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^[A-Z]{3}[PCFTGHLABJ][A-Z][0-9]{4}[A-Z]$"));
static IFSC: LazyLock<Regex> = LazyLock::new(|| compile(r"^[A-Z]{4}0[A-Z0-9]{6}$"));
static ACCOUNT_NUMBER: LazyLock<Regex> = LazyLock::new(|| compile(r"^[0-9]{8,40}$"));
static CIN: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^[UL][0-9]{5}[A-Z]{2}[0-9]{4}[A-Z]{3}[0-9]{6}$"));
static LLPIN: LazyLock<Regex> = LazyLock::new(|| compile(r"^[A-Z]{3}-[0-9]{4}$"));
static GSTIN: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^[0-9]{2}[A-Z]{5}[0-9]{4}[A-Z][1-9A-Z]Z[0-9A-Z]$"));
static OBJECT_ID: LazyLock<Regex> = LazyLock::new(|| compile(r"^[0-9a-fA-F]{24}$"));
static UUID: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
});
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^[^\s@]+@[^\s@]+\.[^\s@]{2,}$"));

/// Exact PAN length, checked before the pattern so a short PAN gets a
/// length-specific message.
pub const PAN_LENGTH: usize = 10;

/// 10-digit Indian mobile number, first digit 6-9.
pub fn is_valid_phone(value: &str) -> bool {
    PHONE.is_match(value)
}

/// Six-digit one-time passcode.
pub fn is_valid_otp(value: &str) -> bool {
    OTP.is_match(value)
}

/// Twelve-digit Aadhaar number.
pub fn is_valid_aadhaar(value: &str) -> bool {
    AADHAAR.is_match(value)
}

/// Permanent Account Number. The fourth character encodes the holder
/// category (P = individual, C = company, F = firm, ...).
pub fn is_valid_pan(value: &str) -> bool {
    PAN.is_match(value)
}

pub fn is_valid_ifsc(value: &str) -> bool {
    IFSC.is_match(value)
}

/// Bank account number: digits only, 8 to 40 characters.
pub fn is_valid_account_number(value: &str) -> bool {
    ACCOUNT_NUMBER.is_match(value)
}

/// Corporate Identification Number issued by the MCA.
pub fn is_valid_cin(value: &str) -> bool {
    CIN.is_match(value)
}

/// LLP Identification Number.
pub fn is_valid_llpin(value: &str) -> bool {
    LLPIN.is_match(value)
}

pub fn is_valid_gstin(value: &str) -> bool {
    GSTIN.is_match(value)
}

/// 24-character hex document identifier.
pub fn is_valid_object_id(value: &str) -> bool {
    OBJECT_ID.is_match(value)
}

/// Hyphenated lower-case UUID, as issued for application and user ids.
pub fn is_valid_uuid(value: &str) -> bool {
    UUID.is_match(value)
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL.is_match(value)
}

/// Mask all but the last four characters: `9876543210` becomes `******3210`.
pub fn mask_tail(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}
