//! Defensive parsing of broker-native payload fields.
//!
//! Quantity and price fields arrive as text or numbers depending on
//! endpoint and broker mood. A missing or malformed value becomes zero,
//! never an error that aborts a cycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use tracing::debug;

/// Parse a decimal out of whatever the broker sent.
pub fn decimal_or_zero(value: Option<&Value>) -> Decimal {
    match value {
        Some(Value::String(s)) => Decimal::from_str(s.trim()).unwrap_or_else(|_| {
            if !s.trim().is_empty() {
                debug!("unparseable numeric field: {:?}", s);
            }
            Decimal::ZERO
        }),
        Some(Value::Number(n)) => n
            .as_f64()
            .and_then(|f| Decimal::from_f64_retain(f))
            .unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

/// Parse an optional decimal; absent and malformed both map to `None`.
pub fn decimal_opt(value: Option<&Value>) -> Option<Decimal> {
    match value {
        Some(Value::String(s)) => Decimal::from_str(s.trim()).ok(),
        Some(Value::Number(n)) => n.as_f64().and_then(Decimal::from_f64_retain),
        _ => None,
    }
}

/// Parse an RFC 3339 timestamp field.
pub fn timestamp_opt(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Pull a string field, empty when absent.
pub fn string_or_empty(value: Option<&Value>) -> String {
    value
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Pull an optional string field.
pub fn string_opt(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn string_and_number_representations_both_parse() {
        let payload = json!({"a": "123.45", "b": 67.5, "c": "-1"});
        assert_eq!(decimal_or_zero(payload.get("a")), dec!(123.45));
        assert_eq!(decimal_or_zero(payload.get("b")), dec!(67.5));
        assert_eq!(decimal_or_zero(payload.get("c")), dec!(-1));
    }

    #[test]
    fn garbage_and_missing_become_zero_not_error() {
        let payload = json!({"a": "not-a-number", "b": null, "c": {}});
        assert_eq!(decimal_or_zero(payload.get("a")), Decimal::ZERO);
        assert_eq!(decimal_or_zero(payload.get("b")), Decimal::ZERO);
        assert_eq!(decimal_or_zero(payload.get("c")), Decimal::ZERO);
        assert_eq!(decimal_or_zero(payload.get("missing")), Decimal::ZERO);
    }

    #[test]
    fn optional_parse_distinguishes_absent_from_zero() {
        let payload = json!({"a": "0", "b": "junk"});
        assert_eq!(decimal_opt(payload.get("a")), Some(Decimal::ZERO));
        assert_eq!(decimal_opt(payload.get("b")), None);
        assert_eq!(decimal_opt(payload.get("missing")), None);
    }

    #[test]
    fn timestamps_parse_rfc3339() {
        let payload = json!({"t": "2024-03-01T14:30:00Z", "bad": "yesterday"});
        assert!(timestamp_opt(payload.get("t")).is_some());
        assert!(timestamp_opt(payload.get("bad")).is_none());
    }
}
