//! Bit-exact type normalization into the unified scalar set (spec.md §6).

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::types::ScalarValue;

pub const BLOB_PLACEHOLDER: &str = "[BLOB DATA]";

pub fn timestamp(ts: DateTime<Utc>) -> ScalarValue {
    ScalarValue::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub fn date(d: NaiveDate) -> ScalarValue {
    ScalarValue::String(d.format("%Y-%m-%d").to_string())
}

pub fn blob() -> ScalarValue {
    ScalarValue::String(BLOB_PLACEHOLDER.to_string())
}

/// Exact-decimal numeric types are rendered as strings, never float64, so
/// precision is never silently lost.
pub fn decimal(digits: impl std::fmt::Display) -> ScalarValue {
    ScalarValue::String(digits.to_string())
}

pub fn json_string(value: &serde_json::Value) -> ScalarValue {
    ScalarValue::String(value.to_string())
}

pub fn object_id_hex(hex: impl Into<String>) -> ScalarValue {
    ScalarValue::String(hex.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_is_iso8601_utc() {
        let ts = chrono::Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let ScalarValue::String(s) = timestamp(ts) else { panic!() };
        assert!(s.starts_with("2026-01-02T03:04:05"));
    }

    #[test]
    fn blob_is_literal_marker() {
        assert_eq!(blob(), ScalarValue::String(BLOB_PLACEHOLDER.to_string()));
    }

    #[test]
    fn decimal_preserves_exact_digits() {
        assert_eq!(decimal("19.900"), ScalarValue::String("19.900".to_string()));
    }
}
