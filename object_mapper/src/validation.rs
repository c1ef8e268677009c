//! Name checks for catalog declarations
//!
//! Table, schema and column names are always emitted quoted, so reserved words
//! are legal; the character set is restricted so no name can close a quote.
//! Attribute names never reach SQL but must not collide with path syntax.

use thiserror::Error;

/// Longest identifier accepted by any supported dialect
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("name cannot be empty")]
    Empty,
    #[error("name '{name}' is too long: {length} characters (max {max})", max = MAX_IDENTIFIER_LENGTH)]
    TooLong { name: String, length: usize },
    #[error("name '{0}' must start with a letter or underscore")]
    InvalidStart(String),
    #[error("name '{0}' may only contain letters, digits and underscores")]
    InvalidCharacters(String),
}

fn check_word(name: &str) -> Result<(), ValidationError> {
    let first = name.chars().next().ok_or(ValidationError::Empty)?;
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(ValidationError::InvalidStart(name.to_string()));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidCharacters(name.to_string()));
    }
    Ok(())
}

/// Table, schema or column name
pub fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    check_word(name)?;
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong {
            name: name.to_string(),
            length: name.len(),
        });
    }
    Ok(())
}

/// Field name used as one segment of an attribute path
pub fn validate_attribute(name: &str) -> Result<(), ValidationError> {
    check_word(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        let long = "a".repeat(MAX_IDENTIFIER_LENGTH);
        for name in ["orders", "order_items", "OrderItems", "_private", "t123", "order", "select", &long] {
            assert!(validate_identifier(name).is_ok(), "should accept {}", name);
        }
    }

    #[test]
    fn test_invalid_identifiers() {
        let cases = [
            ("", ValidationError::Empty),
            ("123table", ValidationError::InvalidStart("123table".to_string())),
            ("order-items", ValidationError::InvalidCharacters("order-items".to_string())),
            ("orders\"; DROP", ValidationError::InvalidCharacters("orders\"; DROP".to_string())),
        ];
        for (name, expected) in cases {
            assert_eq!(validate_identifier(name).unwrap_err(), expected);
        }

        let too_long = "a".repeat(MAX_IDENTIFIER_LENGTH + 1);
        assert!(matches!(
            validate_identifier(&too_long),
            Err(ValidationError::TooLong { length: 64, .. })
        ));
    }

    #[test]
    fn test_attribute_names_cannot_use_path_syntax() {
        assert!(validate_attribute("customer").is_ok());
        assert!(validate_attribute(&"x".repeat(100)).is_ok());
        for name in ["items.qty", "@labels", "#sort", ".tags", ""] {
            assert!(validate_attribute(name).is_err(), "should reject {:?}", name);
        }
    }
}
