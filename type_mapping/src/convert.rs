//! Conversion utilities
//!
//! This module converts between JSON values (the currency of the mapper)
//! and typed SQL values.

use crate::types::PostgresValue;
use serde_json::Value;

/// Classify a JSON value into the typed value it is bound as.
///
/// Strings are probed as RFC3339 timestamps, then UUIDs, then ISO dates;
/// integers that fit in 32 bits bind as `Integer`.
pub fn json_to_postgres_value(value: &Value) -> PostgresValue {
    match value {
        Value::String(s) => {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                PostgresValue::Timestamp(dt.with_timezone(&chrono::Utc))
            } else if let Ok(uuid) = uuid::Uuid::parse_str(s) {
                PostgresValue::Uuid(uuid)
            } else if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                PostgresValue::Date(date)
            } else {
                PostgresValue::Text(s.clone())
            }
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                    PostgresValue::Integer(i as i32)
                } else {
                    PostgresValue::BigInt(i)
                }
            } else if let Some(f) = n.as_f64() {
                PostgresValue::Float(f)
            } else {
                PostgresValue::Decimal(n.to_string())
            }
        }
        Value::Bool(b) => PostgresValue::Boolean(*b),
        Value::Null => PostgresValue::Null,
        other => PostgresValue::Json(other.clone()),
    }
}

/// Convert a decoded typed value back into the JSON currency
pub fn postgres_value_to_json(value: PostgresValue) -> Value {
    match value {
        PostgresValue::Text(s) => Value::String(s),
        PostgresValue::Integer(i) => Value::from(i),
        PostgresValue::BigInt(i) => Value::from(i),
        PostgresValue::SmallInt(i) => Value::from(i),
        PostgresValue::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        PostgresValue::Boolean(b) => Value::Bool(b),
        PostgresValue::Uuid(u) => Value::String(u.to_string()),
        PostgresValue::Timestamp(ts) => Value::String(ts.to_rfc3339()),
        PostgresValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        PostgresValue::Decimal(s) => Value::String(s),
        PostgresValue::Json(v) => v,
        PostgresValue::Null => Value::Null,
    }
}

/// Whether a value can be stored in a text column (null counts as text)
pub fn is_text_value(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Null)
}
