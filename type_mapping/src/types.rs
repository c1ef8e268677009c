//! Typed value definitions
//!
//! This module provides the typed SQL values every JSON parameter is
//! classified into before it is bound to a statement.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Typed SQL value, one variant per binding kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PostgresValue {
    Text(String),
    Integer(i32),
    BigInt(i64),
    SmallInt(i16),
    Float(f64),
    Boolean(bool),
    Uuid(Uuid),
    Timestamp(chrono::DateTime<chrono::Utc>),
    Date(chrono::NaiveDate),
    Decimal(String), // Store as string to preserve precision
    Json(serde_json::Value),
    Null,
}

impl PostgresValue {
    /// Whether the value is SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, PostgresValue::Null)
    }
}
