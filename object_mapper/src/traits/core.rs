//! Trait definitions
//!
//! The store interface over one entity type: graph reads, graph writes,
//! cascade deletes and set-based updates.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;

use crate::connection::SqlRow;
use crate::entity::{EntityKey, ObjectGraph};
use crate::errors::MapperError;
use crate::generic_store::LoadedGraph;
use crate::query_builder::{QueryBuilder, QueryFilter, UpdateSet};

/// Database operations over object graphs rooted at one entity type
#[async_trait]
pub trait GraphStore: Send + Sync + Debug {
    /// Root entity type served by this store
    fn entity_type(&self) -> &str;

    /// Load the graph rooted at `id` covering `attributes`
    async fn find_by_id(&self, id: &Value, attributes: &[&str]) -> Result<Option<LoadedGraph>, MapperError>;

    /// Load at most one root; more than one distinct root is an error
    async fn find_one(&self, attributes: &[&str], query: QueryBuilder) -> Result<Option<LoadedGraph>, MapperError>;

    /// Load every root matching `query`, in query order
    async fn find_list(&self, attributes: &[&str], query: QueryBuilder) -> Result<LoadedGraph, MapperError>;

    /// Like [`find_list`](Self::find_list), snapshotting the result so it can be persisted back
    async fn find_for_update(&self, attributes: &[&str], query: QueryBuilder) -> Result<LoadedGraph, MapperError>;

    /// Number of distinct roots matching the query's filter
    async fn count(&self, query: QueryBuilder) -> Result<u64, MapperError>;

    /// Rows of computed expressions, labelled `c0`, `c1`, …
    async fn aggregate(&self, query: QueryBuilder) -> Result<Vec<SqlRow>, MapperError>;

    /// Write the graph reachable from `root`, assigning generated ids in place
    async fn persist(&self, graph: &mut ObjectGraph, root: EntityKey) -> Result<(), MapperError>;

    /// Delete the root row with its compositions, scalar collections and link rows
    async fn delete(&self, id: &Value) -> Result<u64, MapperError>;

    /// Apply `update` to every root row selected by `filter`
    async fn mass_update(&self, update: UpdateSet, filter: Option<QueryFilter>) -> Result<u64, MapperError>;
}
