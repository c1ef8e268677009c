//! Statement execution seam
//!
//! The orchestrator and materializer only talk to a [`ConnectionSource`].
//! [`PgConnectionSource`] runs statements on a `sqlx` Postgres pool.

mod postgres;

pub use postgres::PgConnectionSource;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::errors::MapperError;
use crate::query_builder::Statement;

/// One result row: labelled values in select-list order
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRow {
    columns: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl SqlRow {
    pub fn new(columns: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn from_pairs<S: Into<String>>(pairs: Vec<(S, Value)>) -> Self {
        let (columns, values): (Vec<String>, Vec<Value>) =
            pairs.into_iter().map(|(label, value)| (label.into(), value)).unzip();
        Self::new(Arc::new(columns), values)
    }

    /// Value of the column labelled `label`, `None` when not selected
    pub fn get(&self, label: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == label)
            .map(|index| &self.values[index])
    }

    /// Non-null value of `label`
    pub fn non_null(&self, label: &str) -> Option<&Value> {
        self.get(label).filter(|v| !v.is_null())
    }

    pub fn first(&self) -> Option<&Value> {
        self.values.first()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Pooled supplier of statement execution.
///
/// Every call acquires its own connection and releases it before returning,
/// on success and on failure.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    async fn fetch(&self, statement: &Statement) -> Result<Vec<SqlRow>, MapperError>;

    /// Rows affected
    async fn execute(&self, statement: &Statement) -> Result<u64, MapperError>;

    /// Run an insert; returns the generated key when `statement.returning` is set
    async fn insert(&self, statement: &Statement) -> Result<Option<Value>, MapperError>;
}
