//! Caller-supplied overrides for entity types, tables and columns

use std::fmt::Debug;

use crate::entity::Entity;

/// Fully qualified table name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub schema: Option<String>,
    pub table: String,
}

impl TableName {
    pub fn new(schema: Option<&str>, table: &str) -> Self {
        Self {
            schema: schema.map(str::to_string),
            table: table.to_string(),
        }
    }
}

/// Every method returns `None` to keep the declared binding.
pub trait Resolver: Debug + Send + Sync {
    /// Substitute the concrete entity type for a declared relationship target
    fn resolve_entity_type(&self, declared: &str) -> Option<String> {
        let _ = declared;
        None
    }

    fn resolve_table(&self, entity: &str) -> Option<TableName> {
        let _ = entity;
        None
    }

    fn resolve_column(&self, entity: &str, field: &str) -> Option<String> {
        let _ = (entity, field);
        None
    }

    /// Build a fresh instance, e.g. with defaults pre-populated
    fn instantiate(&self, entity: &str) -> Option<Entity> {
        let _ = entity;
        None
    }
}
