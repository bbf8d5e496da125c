//! # Schema-Driven Request Validation
//!
//! A [`Schema`] is plain data: a list of [`Field`]s, each naming a JSON key,
//! the [`Rule`] its value must satisfy and whether it is required, plus
//! optional cross-field constraints. [`Schema::validate`] interprets it
//! against an inbound JSON payload and produces either the sanitised
//! payload or every violation found.
//!
//! ## Guarantees
//!
//! - Validation never stops at the first failure; all violations are
//!   returned together.
//! - Keys not named by the schema are dropped from the output.
//! - Strings are trimmed. Numbers are accepted for digit-only rules and
//!   converted to strings. PAN, IFSC, CIN, LLPIN and GSTIN are upper-cased,
//!   email is lower-cased.
//! - `null` and blank strings count as missing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::entity::{CompanySubType, EntityType};
use crate::rules;

/// The check applied to a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Phone,
    Otp,
    Aadhaar,
    Pan,
    Ifsc,
    AccountNumber,
    EntityType,
    CompanySubType,
    Cin,
    Llpin,
    Gstin,
    ObjectId,
    /// Application or user identifier; lower-cased.
    Uuid,
    Email,
    /// Free text with inclusive character-count bounds.
    Text { min: usize, max: usize },
    Boolean,
    /// Whole number with inclusive bounds; numeric strings are coerced.
    Integer { min: i64, max: i64 },
    /// Opaque credential string (refresh tokens).
    Token,
}

impl Rule {
    /// Digit-only rules accept JSON numbers as well as strings.
    fn accepts_number(&self) -> bool {
        matches!(
            self,
            Self::Phone | Self::Otp | Self::Aadhaar | Self::AccountNumber | Self::Text { .. }
        )
    }

    /// Check and normalise one present, non-null value.
    fn apply(&self, name: &str, raw: &Value) -> Result<Value, String> {
        if let Self::Boolean = self {
            return match raw {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::String(s) if s.trim() == "true" => Ok(Value::Bool(true)),
                Value::String(s) if s.trim() == "false" => Ok(Value::Bool(false)),
                _ => Err(format!("{name} must be a boolean")),
            };
        }

        if let Self::Integer { min, max } = self {
            let parsed = match raw {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            return match parsed {
                Some(v) if (*min..=*max).contains(&v) => Ok(Value::from(v)),
                Some(_) => Err(format!("{name} must be between {min} and {max}")),
                None => Err(format!("{name} must be a whole number")),
            };
        }

        let text = match raw {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) if self.accepts_number() => n.to_string(),
            _ => return Err(format!("{name} must be a string")),
        };

        let normalised = match self {
            Self::Pan | Self::Ifsc | Self::Cin | Self::Llpin | Self::Gstin => {
                text.to_ascii_uppercase()
            }
            Self::Email | Self::Uuid => text.to_ascii_lowercase(),
            _ => text,
        };

        let n = normalised.as_str();
        match self {
            Self::Phone => ensure(
                rules::is_valid_phone(n),
                "Phone number must be a valid 10-digit Indian mobile number",
            ),
            Self::Otp => ensure(rules::is_valid_otp(n), "OTP must be exactly 6 digits"),
            Self::Aadhaar => ensure(
                rules::is_valid_aadhaar(n),
                "Aadhaar number must be exactly 12 digits",
            ),
            Self::Pan => ensure(
                n.chars().count() == rules::PAN_LENGTH,
                "PAN must be exactly 10 characters",
            )
            .and_then(|_| ensure(rules::is_valid_pan(n), "Invalid PAN format")),
            Self::Ifsc => ensure(rules::is_valid_ifsc(n), "Invalid IFSC code format"),
            Self::AccountNumber => ensure(
                rules::is_valid_account_number(n),
                "Account number must be 8-40 digits",
            ),
            Self::EntityType => ensure(
                EntityType::parse(n).is_some(),
                "Entity type must be one of: individual, proprietorship, partnership, company",
            ),
            Self::CompanySubType => ensure(
                CompanySubType::parse(n).is_some(),
                "Company sub-type must be one of: pvt_ltd, llp, opc",
            ),
            Self::Cin => ensure(rules::is_valid_cin(n), "Invalid CIN format"),
            Self::Llpin => ensure(
                rules::is_valid_llpin(n),
                "Invalid LLPIN format (expected AAA-1234)",
            ),
            Self::Gstin => ensure(rules::is_valid_gstin(n), "Invalid GSTIN format"),
            Self::ObjectId => ensure(
                rules::is_valid_object_id(n),
                format!("{name} must be a valid identifier"),
            ),
            Self::Uuid => ensure(
                rules::is_valid_uuid(n),
                format!("{name} must be a valid identifier"),
            ),
            Self::Email => ensure(rules::is_valid_email(n), "Invalid email address"),
            Self::Text { min, max } => {
                let len = n.chars().count();
                ensure(
                    (*min..=*max).contains(&len),
                    format!("{name} must be between {min} and {max} characters"),
                )
            }
            Self::Token | Self::Boolean | Self::Integer { .. } => Ok(()),
        }?;

        Ok(Value::String(normalised))
    }
}

fn ensure(condition: bool, message: impl Into<String>) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message.into())
    }
}

/// One entry of a [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub rule: Rule,
    pub required: bool,
}

impl Field {
    pub const fn required(name: &'static str, rule: Rule) -> Self {
        Self {
            name,
            rule,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, rule: Rule) -> Self {
        Self {
            name,
            rule,
            required: false,
        }
    }
}

/// Constraints spanning more than one field, checked after every field
/// has been validated on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossRule {
    /// `companySubType` must be present when `entityType` is `company`.
    SubTypeRequiredForCompany,
    /// `cin` is required for `pvt_ltd`/`opc`, `llpin` for `llp`.
    RegistrarIdMatchesSubType,
}

/// A single field-level violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// Every violation found in one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed: {}", summarize(.violations))]
pub struct ValidationErrors {
    violations: Vec<FieldViolation>,
}

fn summarize(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    /// Build from a single violation, for checks made outside a schema.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: vec![FieldViolation {
                field: field.into(),
                message: message.into(),
            }],
        }
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    pub fn into_violations(self) -> Vec<FieldViolation> {
        self.violations
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    fn has(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }

    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.violations.push(FieldViolation {
            field: field.to_string(),
            message: message.into(),
        });
    }
}

/// Declarative description of an acceptable payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
    cross: Vec<CrossRule>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn cross(mut self, rule: CrossRule) -> Self {
        self.cross.push(rule);
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Validate `input` and return the sanitised object.
    ///
    /// A missing payload (`null`) is treated as an empty object so that every
    /// required field is reported. Any other non-object payload is a single
    /// violation on the pseudo-field `payload`.
    pub fn validate(&self, input: &Value) -> Result<Map<String, Value>, ValidationErrors> {
        let empty = Map::new();
        let object = match input {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(ValidationErrors::single(
                    "payload",
                    "Request payload must be a JSON object",
                ))
            }
        };

        let mut errors = ValidationErrors {
            violations: Vec::new(),
        };
        let mut output = Map::new();

        for field in &self.fields {
            match object.get(field.name).filter(|v| !is_blank(v)) {
                None => {
                    if field.required {
                        errors.push(field.name, format!("{} is required", field.name));
                    }
                }
                Some(raw) => match field.rule.apply(field.name, raw) {
                    Ok(value) => {
                        output.insert(field.name.to_string(), value);
                    }
                    Err(message) => errors.push(field.name, message),
                },
            }
        }

        for rule in &self.cross {
            apply_cross(*rule, &output, &mut errors);
        }

        if errors.is_empty() {
            Ok(output)
        } else {
            Err(errors)
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn apply_cross(rule: CrossRule, output: &Map<String, Value>, errors: &mut ValidationErrors) {
    let get = |key: &str| output.get(key).and_then(Value::as_str);

    match rule {
        CrossRule::SubTypeRequiredForCompany => {
            if get("entityType") == Some(EntityType::Company.as_str())
                && get("companySubType").is_none()
                && !errors.has("companySubType")
            {
                errors.push(
                    "companySubType",
                    "Company sub-type is required for company entities",
                );
            }
        }
        CrossRule::RegistrarIdMatchesSubType => {
            let Some(sub_type) = get("companySubType").and_then(CompanySubType::parse) else {
                return;
            };
            let (key, message) = if sub_type.uses_llpin() {
                ("llpin", "LLPIN is required for LLP registrations")
            } else {
                ("cin", "CIN is required for company registrations")
            };
            if get(key).is_none() && !errors.has(key) {
                errors.push(key, message);
            }
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        /// Any 10-digit number starting 6-9 is a valid phone.
        #[test]
        fn mobile_numbers_accepted(phone in "[6-9][0-9]{9}") {
            let schema = Schema::new().field(Field::required("phone", Rule::Phone));
            let input = json!({ "phone": phone });
            prop_assert!(schema.validate(&input).is_ok());
        }

        /// Leading digits 0-5 are never accepted.
        #[test]
        fn landline_prefixes_rejected(phone in "[0-5][0-9]{9}") {
            let schema = Schema::new().field(Field::required("phone", Rule::Phone));
            let input = json!({ "phone": phone });
            prop_assert!(schema.validate(&input).is_err());
        }

        /// Case never affects PAN acceptance; output is always upper-case.
        #[test]
        fn pan_case_insensitive(pan in "[a-zA-Z]{3}[pcftghlabjPCFTGHLABJ][a-zA-Z][0-9]{4}[a-zA-Z]") {
            let schema = Schema::new().field(Field::required("pan", Rule::Pan));
            let out = schema.validate(&json!({ "pan": pan.clone() })).unwrap();
            prop_assert_eq!(out["pan"].as_str().unwrap(), pan.to_ascii_uppercase());
        }

        /// An empty payload yields exactly one violation per required field.
        #[test]
        fn one_violation_per_required_field(n in 1usize..6) {
            let names = ["a", "b", "c", "d", "e", "f"];
            let mut schema = Schema::new();
            for name in &names[..n] {
                schema = schema.field(Field::required(*name, Rule::Token));
            }
            let err = schema.validate(&json!({})).unwrap_err();
            prop_assert_eq!(err.violations().len(), n);
        }
    }
}
