//! Convenience re-exports for common object-mapper usage

// Schema declaration
pub use crate::catalog::{
    Cardinality, Encryptor, EntityDescriptor, IdStrategy, RelationDescriptor, RelationKind, Resolver,
    ScalarCollection, SchemaCatalog, TableName, ValueConverter,
};

// Object graph
pub use crate::entity::{Entity, EntityKey, FieldValue, ObjectGraph};

// Error types
pub use crate::errors::MapperError;

// Core store functionality
pub use crate::generic_store::{EntityStore, LoadedGraph};
pub use crate::traits::GraphStore;

pub use crate::id_type::UniversalId;

// Query building
pub use crate::query_builder::{
    Expression, GroupBy, Pagination, Projection, QueryBuilder, QueryFilter, SortOrder, UpdateSet,
};

// Common external dependencies that are frequently used
pub use async_trait::async_trait;
pub use serde_json::{json, Value};
