//! Tolerant field accessors over `serde_json::Value`.
//!
//! Every reader in this crate goes through these helpers. A missing, null or
//! mistyped field yields `None` and the caller picks its own default.

use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Parse a body into a JSON object, or `None` for anything else.
#[must_use]
pub fn parse_object(raw: &str) -> Option<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Nested object under `key`.
#[must_use]
pub fn object<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).filter(|v| v.is_object())
}

/// String under `key`. Numbers and booleans are not coerced.
#[must_use]
pub fn string(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Trimmed, non-blank string under `key`.
#[must_use]
pub fn non_blank(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[must_use]
pub fn boolean(value: &Value, key: &str) -> Option<bool> {
    value.get(key).and_then(Value::as_bool)
}

/// Non-negative integer under `key` that fits in a `u32`.
#[must_use]
pub fn unsigned(value: &Value, key: &str) -> Option<u32> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

/// Signed integer under `key` that fits in an `i64`.
#[must_use]
pub fn integer(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_i64)
}

/// RFC 3339 timestamp under `key`. Blank or unparsable values are `None`.
#[must_use]
pub fn instant(value: &Value, key: &str) -> Option<OffsetDateTime> {
    let raw = non_blank(value, key)?;
    OffsetDateTime::parse(&raw, &Rfc3339).ok()
}

#[cfg(test)]
#[path = "fields_test.rs"]
mod tests;
