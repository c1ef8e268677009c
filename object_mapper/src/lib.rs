//! Object Mapper - core of RelHaus
//!
//! Maps entity graphs onto relational tables without a generated model layer:
//! a [`SchemaCatalog`] describes entities and relationships, a [`Mapping`]
//! binds attribute paths to table aliases, [`SqlGenerator`] renders statements,
//! the [`Persister`] diffs and writes graphs and the [`Materializer`] rebuilds
//! graphs from joined rows. [`EntityStore`] ties them together per entity type.

/// Conditional debug logging macros
/// These macros only compile in code when the `debug-logging` feature is enabled
#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

pub mod catalog;
pub mod connection;
pub mod dialect;
pub mod entity;
pub mod errors;
pub mod generic_store;
pub mod id_type;
pub mod mapping;
pub mod materialize;
pub mod persist;
pub mod prelude;
pub mod query_builder;
pub mod traits;
pub mod validation;

#[cfg(test)]
mod testing;

pub use catalog::{
    Cardinality, EntityDescriptor, IdStrategy, RelationDescriptor, RelationKind, ScalarCollection,
    SchemaCatalog,
};
pub use connection::{ConnectionSource, PgConnectionSource, SqlRow};
pub use dialect::Dialect;
pub use entity::{Entity, EntityKey, FieldValue, ObjectGraph};
pub use errors::MapperError;
pub use generic_store::{EntityStore, LoadedGraph};
pub use id_type::UniversalId;
pub use mapping::Mapping;
pub use materialize::Materializer;
pub use persist::Persister;
pub use query_builder::{QueryBuilder, QueryFilter, QueryOperator, SortOrder, SqlGenerator, UpdateSet};
pub use traits::GraphStore;
pub use validation::ValidationError;
