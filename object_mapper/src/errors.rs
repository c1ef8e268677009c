//! Error types for the object mapper
//!
//! Every failure aborts the current call; nothing is retried or swallowed.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MapperError {
    /// Missing schema/table/column binding or an unresolvable relationship target
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Duplicate table alias '{0}' in mapping")]
    DuplicateAlias(String),

    #[error("Duplicate mapping path '{0}'")]
    DuplicatePath(String),

    #[error("Path '{0}' is not registered in the mapping")]
    UnknownPath(String),

    #[error("Validation error on {entity}.{field}: {reason}")]
    Validation {
        entity: String,
        field: String,
        reason: String,
    },

    #[error("{entity} with id {id} was not loaded for update and cannot be saved")]
    NotLoadedForUpdate { entity: String, id: String },

    #[error("Operator {operator} is not supported on encrypted field '{field}'")]
    UnsupportedOperator { field: String, operator: String },

    #[error("Encryption error on '{field}': {reason}")]
    Encryption { field: String, reason: String },

    #[error("Conversion error with converter '{converter}': {reason}")]
    Conversion { converter: String, reason: String },

    /// Foreign-key violation while deleting; callers may fall back to soft-delete
    #[error("Row in '{table}' is still referenced and cannot be deleted")]
    InUse { table: String, sql: String },

    #[error("Statement failed: {source} [sql: {sql}]")]
    Statement {
        sql: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Pending reference {entity}.{field} never received an id; the referenced object is unreachable from the persisted graph")]
    PendingUpdate { entity: String, field: String },

    #[error("Expected at most one {entity}, found {count}")]
    MultipleResults { entity: String, count: usize },

    #[error("Database error: {0}")]
    Database(String),
}

impl MapperError {
    pub fn configuration(message: impl Into<String>) -> Self {
        MapperError::Configuration(message.into())
    }

    pub fn validation(
        entity: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        MapperError::Validation {
            entity: entity.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a driver error with the statement text, translating FK violations
    /// into [`MapperError::InUse`] when `table` is given (delete statements).
    pub fn statement(sql: &str, table: Option<&str>, source: sqlx::Error) -> Self {
        if let (Some(table), sqlx::Error::Database(db)) = (table, &source) {
            if db.is_foreign_key_violation() {
                tracing::debug!(table, "delete rejected by foreign key constraint");
                return MapperError::InUse {
                    table: table.to_string(),
                    sql: sql.to_string(),
                };
            }
        }
        MapperError::Statement {
            sql: sql.to_string(),
            source,
        }
    }

    /// Whether the error means "referenced elsewhere, soft-delete instead"
    pub fn is_in_use(&self) -> bool {
        matches!(self, MapperError::InUse { .. })
    }
}
