//! Id Type module
//!
//! Hashable identity for entity ids travelling as JSON values.

use serde_json::Value;
use std::fmt::{self, Display};
use uuid::Uuid;

/// Universal ID type that can handle both numeric IDs and UUIDs efficiently
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UniversalId {
    /// Numeric ID (i32, i64, etc.)
    Numeric(i64),
    /// UUID ID
    Uuid(Uuid),
    /// String-based ID
    String(String),
}

impl UniversalId {
    /// Normalise a JSON id value. Returns `None` for null and non-scalar values.
    ///
    /// Numeric strings stay strings: `"7"` and `7` are different ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(UniversalId::Numeric),
            Value::String(s) => Some(match Uuid::parse_str(s) {
                Ok(uuid) => UniversalId::Uuid(uuid),
                Err(_) => UniversalId::String(s.clone()),
            }),
            _ => None,
        }
    }

    /// Convert back into the JSON currency
    pub fn to_value(&self) -> Value {
        match self {
            UniversalId::Numeric(n) => Value::from(*n),
            UniversalId::Uuid(uuid) => Value::String(uuid.to_string()),
            UniversalId::String(s) => Value::String(s.clone()),
        }
    }
}

impl Display for UniversalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniversalId::Numeric(n) => write!(f, "{}", n),
            UniversalId::Uuid(uuid) => write!(f, "{}", uuid),
            UniversalId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i32> for UniversalId {
    fn from(id: i32) -> Self {
        UniversalId::Numeric(id as i64)
    }
}

impl From<i64> for UniversalId {
    fn from(id: i64) -> Self {
        UniversalId::Numeric(id)
    }
}

impl From<Uuid> for UniversalId {
    fn from(id: Uuid) -> Self {
        UniversalId::Uuid(id)
    }
}

impl From<String> for UniversalId {
    fn from(id: String) -> Self {
        UniversalId::String(id)
    }
}

impl From<&str> for UniversalId {
    fn from(id: &str) -> Self {
        UniversalId::String(id.to_string())
    }
}
