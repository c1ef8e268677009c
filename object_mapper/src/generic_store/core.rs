use serde_json::Value;
use std::sync::Arc;

use crate::catalog::SchemaCatalog;
use crate::connection::ConnectionSource;
use crate::dialect::Dialect;
use crate::entity::{EntityKey, ObjectGraph};
use crate::errors::MapperError;
use crate::mapping::Mapping;
use crate::query_builder::QueryBuilder;

/// Store over object graphs rooted at one entity type
#[derive(Clone)]
pub struct EntityStore {
    pub(crate) entity: String,
    pub(crate) catalog: Arc<SchemaCatalog>,
    pub(crate) dialect: Dialect,
    pub(crate) source: Arc<dyn ConnectionSource>,
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("entity", &self.entity)
            .field("dialect", &self.dialect.kind())
            .finish()
    }
}

impl EntityStore {
    /// Create a store for `entity`, which must be registered in the catalog
    pub fn new(
        entity: &str,
        catalog: Arc<SchemaCatalog>,
        dialect: Dialect,
        source: Arc<dyn ConnectionSource>,
    ) -> Result<Self, MapperError> {
        catalog.entity(entity)?;
        Ok(Self {
            entity: entity.to_string(),
            catalog,
            dialect,
            source,
        })
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Mapping for the requested attributes plus every path the query refers to
    pub fn mapping_for(&self, attributes: &[&str], query: &QueryBuilder) -> Result<Mapping, MapperError> {
        let mut mapping = Mapping::build(&self.catalog, &self.entity, attributes)?;
        for path in query.referenced_paths() {
            mapping.add_attribute(&self.catalog, &path)?;
        }
        Ok(mapping)
    }

    /// Name of the root id field
    pub(crate) fn id_field(&self) -> Result<String, MapperError> {
        Ok(self.catalog.entity(&self.entity)?.id_field.clone())
    }
}

/// Result of a graph read: the arena and its roots in query order
#[derive(Debug, Clone, Default)]
pub struct LoadedGraph {
    pub graph: ObjectGraph,
    pub roots: Vec<EntityKey>,
}

impl LoadedGraph {
    /// First root, if any
    pub fn root(&self) -> Option<EntityKey> {
        self.roots.first().copied()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Every root rendered through [`ObjectGraph::to_json`]
    pub fn to_json(&self) -> Value {
        Value::Array(self.roots.iter().map(|key| self.graph.to_json(*key)).collect())
    }
}
