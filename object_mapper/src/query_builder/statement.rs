use serde_json::Value;

/// Rendered SQL with its parameters in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    /// Fetch rows one at a time instead of prefetching the result
    pub streaming: bool,
    /// Id column returned by an insert
    pub returning: Option<String>,
    /// Table a delete targets; set so FK violations translate to `InUse`
    pub delete_target: Option<String>,
}

impl Statement {
    pub fn new(sql: String, params: Vec<Value>) -> Self {
        Self {
            sql,
            params,
            streaming: false,
            returning: None,
            delete_target: None,
        }
    }
}

/// Result column label of `alias.column`
pub fn column_label(alias: &str, column: &str) -> String {
    format!("{}_{}", alias, column)
}

/// Result column label of the `index`-th computed expression
pub fn expression_label(index: usize) -> String {
    format!("c{}", index)
}
