//! Value converters between object values and stored column values

use serde_json::Value;
use std::fmt::Debug;

use crate::errors::MapperError;

/// Bidirectional transform applied on write (`to_db`) and on read (`to_vo`)
pub trait ValueConverter: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn to_db(&self, value: &Value) -> Result<Value, MapperError>;

    fn to_vo(&self, value: &Value) -> Result<Value, MapperError>;
}

/// Booleans stored as 0/1 integers
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolAsInt;

impl ValueConverter for BoolAsInt {
    fn name(&self) -> &str {
        "bool_as_int"
    }

    fn to_db(&self, value: &Value) -> Result<Value, MapperError> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Bool(b) => Ok(Value::from(if *b { 1 } else { 0 })),
            other => Err(MapperError::Conversion {
                converter: self.name().to_string(),
                reason: format!("expected a boolean, got {}", other),
            }),
        }
    }

    fn to_vo(&self, value: &Value) -> Result<Value, MapperError> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Number(n) => Ok(Value::Bool(n.as_i64().unwrap_or(0) != 0)),
            other => Err(MapperError::Conversion {
                converter: self.name().to_string(),
                reason: format!("expected 0 or 1, got {}", other),
            }),
        }
    }
}

/// Structured values stored as JSON text
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonText;

impl ValueConverter for JsonText {
    fn name(&self) -> &str {
        "json_text"
    }

    fn to_db(&self, value: &Value) -> Result<Value, MapperError> {
        match value {
            Value::Null => Ok(Value::Null),
            other => serde_json::to_string(other)
                .map(Value::String)
                .map_err(|e| MapperError::Conversion {
                    converter: self.name().to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    fn to_vo(&self, value: &Value) -> Result<Value, MapperError> {
        match value {
            Value::String(text) => serde_json::from_str(text).map_err(|e| MapperError::Conversion {
                converter: self.name().to_string(),
                reason: e.to_string(),
            }),
            other => Ok(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bool_as_int() {
        let conv = BoolAsInt;
        assert_eq!(conv.to_db(&json!(true)).unwrap(), json!(1));
        assert_eq!(conv.to_db(&json!(false)).unwrap(), json!(0));
        assert_eq!(conv.to_vo(&json!(1)).unwrap(), json!(true));
        assert_eq!(conv.to_vo(&Value::Null).unwrap(), Value::Null);
        assert!(conv.to_db(&json!("yes")).is_err());
    }

    #[test]
    fn test_json_text() {
        let conv = JsonText;
        let stored = conv.to_db(&json!({"a": [1, 2]})).unwrap();
        assert_eq!(stored, json!("{\"a\":[1,2]}"));
        assert_eq!(conv.to_vo(&stored).unwrap(), json!({"a": [1, 2]}));
        assert!(conv.to_vo(&json!("{broken")).is_err());
    }
}
