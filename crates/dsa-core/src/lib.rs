//! # dsa-core: Domain Layer for DSA Onboarding
//!
//! Framework-free building blocks shared by the API service:
//!
//! - [`rules`]: format predicates for Indian regulatory identifiers
//!   (mobile number, Aadhaar, PAN, IFSC, CIN, LLPIN, GSTIN).
//! - [`validation`]: a schema-driven validation engine that sanitises a
//!   JSON payload or reports every field violation in one pass.
//! - [`entity`]: entity types, company sub-types and the application
//!   lifecycle.
//! - [`redact`]: recursive redaction of sensitive keys for audit records.
//!
//! ## Crate Policy
//!
//! - No dependency on Axum, Tokio or a database driver.
//! - No `.unwrap()` outside tests.

pub mod entity;
pub mod redact;
pub mod rules;
pub mod validation;

pub use entity::{ApplicationStatus, CompanySubType, CompletedSteps, EntityType};
pub use redact::{redact, REDACTED};
pub use validation::{CrossRule, Field, FieldViolation, Rule, Schema, ValidationErrors};
