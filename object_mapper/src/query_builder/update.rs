use serde_json::Value;
use std::collections::BTreeMap;

/// Type of update operation to perform on a field
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOperation {
    /// Set field to a specific value: field = $N
    Set(Value),

    /// Increment field by a value: field = field + $N
    Increment(Value),

    /// Decrement field by a value: field = field - $N
    Decrement(Value),

    /// Multiply field by a value: field = field * $N
    Multiply(Value),

    /// Divide field by a value: field = field / $N
    Divide(Value),
}

impl UpdateOperation {
    /// Render `column = <expr>` given the quoted column and the operand placeholder
    pub fn to_sql(&self, column: &str, placeholder: &str) -> String {
        match self {
            UpdateOperation::Set(_) => format!("{} = {}", column, placeholder),
            UpdateOperation::Increment(_) => format!("{} = {} + {}", column, column, placeholder),
            UpdateOperation::Decrement(_) => format!("{} = {} - {}", column, column, placeholder),
            UpdateOperation::Multiply(_) => format!("{} = {} * {}", column, column, placeholder),
            UpdateOperation::Divide(_) => format!("{} = {} / {}", column, column, placeholder),
        }
    }

    /// Get the value to bind as a parameter
    pub fn value(&self) -> &Value {
        match self {
            UpdateOperation::Set(v)
            | UpdateOperation::Increment(v)
            | UpdateOperation::Decrement(v)
            | UpdateOperation::Multiply(v)
            | UpdateOperation::Divide(v) => v,
        }
    }
}

/// Mass-update operations keyed by root field name, rendered in name order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSet {
    pub operations: BTreeMap<String, UpdateOperation>,
}

impl UpdateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field to a specific value
    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.operations
            .insert(field.into(), UpdateOperation::Set(value));
        self
    }

    /// Increment a field by a value (atomic: field = field + value)
    pub fn increment(mut self, field: impl Into<String>, value: Value) -> Self {
        self.operations
            .insert(field.into(), UpdateOperation::Increment(value));
        self
    }

    /// Decrement a field by a value (atomic: field = field - value)
    pub fn decrement(mut self, field: impl Into<String>, value: Value) -> Self {
        self.operations
            .insert(field.into(), UpdateOperation::Decrement(value));
        self
    }

    /// Multiply a field by a value (atomic: field = field * value)
    pub fn multiply(mut self, field: impl Into<String>, value: Value) -> Self {
        self.operations
            .insert(field.into(), UpdateOperation::Multiply(value));
        self
    }

    /// Divide a field by a value (atomic: field = field / value)
    pub fn divide(mut self, field: impl Into<String>, value: Value) -> Self {
        self.operations
            .insert(field.into(), UpdateOperation::Divide(value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}
