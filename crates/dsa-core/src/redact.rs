//! # Payload Redaction
//!
//! Strips sensitive values from JSON payloads before they are written to
//! the audit log. A key is sensitive when its lower-cased name contains any
//! of [`SENSITIVE_MARKERS`]; its value is replaced by [`REDACTED`] whatever
//! its type.
//!
//! Matching is by substring, so `companySubType` is redacted too (it
//! contains `pan`).

use serde_json::{Map, Value};

/// Replacement written in place of a sensitive value.
pub const REDACTED: &str = "[REDACTED]";

/// Lower-case substrings that mark a key as sensitive.
pub const SENSITIVE_MARKERS: [&str; 9] = [
    "password",
    "otp",
    "aadhaar",
    "pan",
    "accountnumber",
    "photo",
    "apikey",
    "secret",
    "token",
];

/// Whether a key name matches any sensitive marker (case-insensitive).
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Return a copy of `value` with every sensitive key's value redacted.
///
/// Objects are walked recursively. An array is walked element by element
/// only when every element is a plain object; any other array is copied
/// unchanged. Scalars are returned as-is.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(redact_object(map)),
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            Value::Array(items.iter().map(redact).collect())
        }
        other => other.clone(),
    }
}

fn redact_object(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| {
            let value = if is_sensitive_key(key) {
                Value::String(REDACTED.to_string())
            } else {
                redact(value)
            };
            (key.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn top_level_and_nested_keys_are_redacted() {
        let input = json!({
            "password": "x",
            "nested": { "token": "y", "keep": 1 },
            "phone": "9876543210"
        });
        let out = redact(&input);
        assert_eq!(out["password"], REDACTED);
        assert_eq!(out["nested"]["token"], REDACTED);
        assert_eq!(out["nested"]["keep"], 1);
        assert_eq!(out["phone"], "9876543210");
    }

    #[test]
    fn matching_is_case_insensitive_substring() {
        assert!(is_sensitive_key("accessToken"));
        assert!(is_sensitive_key("AccountNumber"));
        assert!(is_sensitive_key("aadhaarNumber"));
        assert!(is_sensitive_key("PAN"));
        assert!(is_sensitive_key("clientSecret"));
        assert!(is_sensitive_key("profilePhoto"));
        assert!(!is_sensitive_key("phone"));
        assert!(!is_sensitive_key("ifsc"));
    }

    #[test]
    fn sensitive_object_value_is_replaced_whole() {
        let out = redact(&json!({ "refreshToken": { "value": "abc" } }));
        assert_eq!(out["refreshToken"], REDACTED);
    }

    #[test]
    fn arrays_of_objects_are_walked() {
        let out = redact(&json!({ "directors": [{ "pan": "ABCPX1234X", "name": "A" }] }));
        assert_eq!(out["directors"][0]["pan"], REDACTED);
        assert_eq!(out["directors"][0]["name"], "A");
    }

    #[test]
    fn mixed_arrays_are_copied_unchanged() {
        let input = json!({ "items": [{ "otp": "123456" }, "loose"] });
        let out = redact(&input);
        assert_eq!(out["items"], input["items"]);
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(redact(&json!(5)), json!(5));
        assert_eq!(redact(&Value::Null), Value::Null);
    }
}
