//! Predicate trees over attribute paths

use serde_json::Value;

/// Query condition operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOperator {
    Eq,        // =
    Ne,        // <>
    Gt,        // >
    Gte,       // >=
    Lt,        // <
    Lte,       // <=
    Like,      // LIKE
    In,        // IN
    NotIn,     // NOT IN
    IsNull,    // IS NULL
    IsNotNull, // IS NOT NULL
}

impl QueryOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOperator::Eq => "EQ",
            QueryOperator::Ne => "NEQ",
            QueryOperator::Gt => "GT",
            QueryOperator::Gte => "GTE",
            QueryOperator::Lt => "LT",
            QueryOperator::Lte => "LTE",
            QueryOperator::Like => "LIKE",
            QueryOperator::In => "IN",
            QueryOperator::NotIn => "NOT_IN",
            QueryOperator::IsNull => "IS_NULL",
            QueryOperator::IsNotNull => "IS_NOT_NULL",
        }
    }

    /// Operators with no meaning against ciphertext
    pub fn needs_plaintext(&self) -> bool {
        matches!(
            self,
            QueryOperator::Gt
                | QueryOperator::Gte
                | QueryOperator::Lt
                | QueryOperator::Lte
                | QueryOperator::Like
        )
    }

    /// SQL comparison token for binary operators
    pub(crate) fn comparison(&self) -> Option<&'static str> {
        match self {
            QueryOperator::Eq => Some("="),
            QueryOperator::Ne => Some("<>"),
            QueryOperator::Gt => Some(">"),
            QueryOperator::Gte => Some(">="),
            QueryOperator::Lt => Some("<"),
            QueryOperator::Lte => Some("<="),
            QueryOperator::Like => Some("LIKE"),
            _ => None,
        }
    }
}

/// Single condition in WHERE clause
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCondition {
    /// Dotted attribute path, e.g. `items.qty`
    pub field: String,
    pub operator: QueryOperator,
    pub value: Option<Value>, // None for IS NULL/IS NOT NULL
}

/// Logical operators for combining conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

/// Query filter that can be nested
#[derive(Debug, Clone, PartialEq)]
pub enum QueryFilter {
    Condition(QueryCondition),
    Group {
        operator: LogicalOperator,
        filters: Vec<QueryFilter>,
    },
}

impl QueryFilter {
    /// Create a simple condition
    pub fn condition(field: &str, operator: QueryOperator, value: Option<Value>) -> Self {
        Self::Condition(QueryCondition {
            field: field.to_string(),
            operator,
            value,
        })
    }

    /// Create AND group
    pub fn and(filters: Vec<QueryFilter>) -> Self {
        Self::Group {
            operator: LogicalOperator::And,
            filters,
        }
    }

    /// Create OR group
    pub fn or(filters: Vec<QueryFilter>) -> Self {
        Self::Group {
            operator: LogicalOperator::Or,
            filters,
        }
    }

    /// Equal condition; a null value renders IS NULL
    pub fn eq(field: &str, value: Value) -> Self {
        Self::condition(field, QueryOperator::Eq, Some(value))
    }

    /// Not equal condition; a null value renders IS NOT NULL
    pub fn ne(field: &str, value: Value) -> Self {
        Self::condition(field, QueryOperator::Ne, Some(value))
    }

    pub fn gt(field: &str, value: Value) -> Self {
        Self::condition(field, QueryOperator::Gt, Some(value))
    }

    pub fn gte(field: &str, value: Value) -> Self {
        Self::condition(field, QueryOperator::Gte, Some(value))
    }

    pub fn lt(field: &str, value: Value) -> Self {
        Self::condition(field, QueryOperator::Lt, Some(value))
    }

    pub fn lte(field: &str, value: Value) -> Self {
        Self::condition(field, QueryOperator::Lte, Some(value))
    }

    pub fn like(field: &str, pattern: &str) -> Self {
        Self::condition(
            field,
            QueryOperator::Like,
            Some(Value::String(pattern.to_string())),
        )
    }

    pub fn in_values(field: &str, values: Vec<Value>) -> Self {
        Self::condition(field, QueryOperator::In, Some(Value::Array(values)))
    }

    pub fn not_in_values(field: &str, values: Vec<Value>) -> Self {
        Self::condition(field, QueryOperator::NotIn, Some(Value::Array(values)))
    }

    pub fn is_null(field: &str) -> Self {
        Self::condition(field, QueryOperator::IsNull, None)
    }

    pub fn is_not_null(field: &str) -> Self {
        Self::condition(field, QueryOperator::IsNotNull, None)
    }

    /// Attribute paths referenced anywhere in the tree
    pub fn paths(&self) -> Vec<&str> {
        match self {
            QueryFilter::Condition(condition) => vec![condition.field.as_str()],
            QueryFilter::Group { filters, .. } => filters.iter().flat_map(|f| f.paths()).collect(),
        }
    }
}
