//! Graph store implementation
//!
//! Reads go through the materializer. Paged list reads run in two phases:
//! the page is cut over distinct root ids, then the full mapping is fetched
//! for exactly those ids, so joins to many-valued relationships never split
//! a root across page boundaries.

use async_trait::async_trait;
use serde_json::Value;

use super::core::{EntityStore, LoadedGraph};
use crate::connection::SqlRow;
use crate::entity::{EntityKey, ObjectGraph};
use crate::errors::MapperError;
use crate::id_type::UniversalId;
use crate::mapping::Mapping;
use crate::materialize::Materializer;
use crate::persist::Persister;
use crate::query_builder::{
    column_label, Pagination, Projection, QueryBuilder, QueryFilter, SqlGenerator, UpdateSet,
};
use crate::traits::GraphStore;

impl EntityStore {
    fn materializer(&self) -> Materializer<'_> {
        Materializer::new(&self.catalog, &self.dialect, self.source.as_ref())
    }

    /// Phase 1: distinct root ids of the requested page, in query order
    async fn page_ids(&self, mapping: &Mapping, query: &QueryBuilder) -> Result<Vec<Value>, MapperError> {
        let root = mapping.root()?;
        let id_column = root
            .id_column
            .as_deref()
            .ok_or_else(|| MapperError::UnknownPath(self.entity.clone()))?;
        let label = column_label(&root.alias, id_column);

        let ids_query = query.clone().projection(Projection::RootIds);
        let statement = SqlGenerator::new(&self.catalog, &self.dialect).build_select(mapping, &ids_query)?;
        let rows = self.source.fetch(&statement).await?;

        let mut seen = std::collections::HashSet::new();
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(id) = row.non_null(&label) else {
                continue;
            };
            if let Some(universal) = UniversalId::from_value(id) {
                if seen.insert(universal) {
                    ids.push(id.clone());
                }
            }
        }
        Ok(ids)
    }

    async fn load(&self, attributes: &[&str], query: &QueryBuilder) -> Result<LoadedGraph, MapperError> {
        let mapping = self.mapping_for(attributes, query)?;
        let mut graph = ObjectGraph::new();

        if !query.pagination().is_paged() {
            let roots = self.materializer().fetch(&mapping, query, &mut graph).await?;
            return Ok(LoadedGraph { graph, roots });
        }

        let ids = self.page_ids(&mapping, query).await?;
        if ids.is_empty() {
            return Ok(LoadedGraph { graph, roots: Vec::new() });
        }
        crate::debug_log!("Loading page of {} {} roots", ids.len(), self.entity);

        let page = QueryBuilder {
            projection: Projection::default(),
            pagination: Pagination::default(),
            ..query.clone()
        }
        .filter(QueryFilter::in_values(&self.id_field()?, ids.clone()));
        let mut roots = self.materializer().fetch(&mapping, &page, &mut graph).await?;

        let order: Vec<Option<UniversalId>> = ids.iter().map(UniversalId::from_value).collect();
        roots.sort_by_key(|key| {
            let id = graph.get(*key).universal_id();
            order.iter().position(|o| *o == id).unwrap_or(usize::MAX)
        });
        Ok(LoadedGraph { graph, roots })
    }
}

fn first_count(rows: &[SqlRow]) -> Result<u64, MapperError> {
    let value = rows.first().and_then(SqlRow::first).cloned().unwrap_or(Value::from(0));
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| MapperError::Database(format!("Unexpected count value {}", value)))
}

#[async_trait]
impl GraphStore for EntityStore {
    fn entity_type(&self) -> &str {
        &self.entity
    }

    async fn find_by_id(&self, id: &Value, attributes: &[&str]) -> Result<Option<LoadedGraph>, MapperError> {
        let query = QueryBuilder::new().filter(QueryFilter::eq(&self.id_field()?, id.clone()));
        self.find_one(attributes, query).await
    }

    async fn find_one(&self, attributes: &[&str], query: QueryBuilder) -> Result<Option<LoadedGraph>, MapperError> {
        let loaded = self.load(attributes, &query).await?;
        match loaded.len() {
            0 => Ok(None),
            1 => Ok(Some(loaded)),
            count => Err(MapperError::MultipleResults {
                entity: self.entity.clone(),
                count,
            }),
        }
    }

    async fn find_list(&self, attributes: &[&str], query: QueryBuilder) -> Result<LoadedGraph, MapperError> {
        self.load(attributes, &query).await
    }

    async fn find_for_update(&self, attributes: &[&str], query: QueryBuilder) -> Result<LoadedGraph, MapperError> {
        let mut loaded = self.load(attributes, &query).await?;
        loaded.graph.mark_loaded();
        Ok(loaded)
    }

    async fn count(&self, query: QueryBuilder) -> Result<u64, MapperError> {
        let mapping = self.mapping_for(&[], &query)?;
        let statement = SqlGenerator::new(&self.catalog, &self.dialect).build_count(&mapping, &query)?;
        first_count(&self.source.fetch(&statement).await?)
    }

    async fn aggregate(&self, query: QueryBuilder) -> Result<Vec<SqlRow>, MapperError> {
        if !matches!(query.projection, Projection::Expressions(_)) {
            return Err(MapperError::configuration("aggregate requires an expression projection"));
        }
        let mapping = self.mapping_for(&[], &query)?;
        let statement = SqlGenerator::new(&self.catalog, &self.dialect).build_select(&mapping, &query)?;
        self.source.fetch(&statement).await
    }

    async fn persist(&self, graph: &mut ObjectGraph, root: EntityKey) -> Result<(), MapperError> {
        Persister::new(&self.catalog, &self.dialect, self.source.as_ref())
            .persist(graph, root)
            .await
    }

    async fn delete(&self, id: &Value) -> Result<u64, MapperError> {
        tracing::debug!(entity = %self.entity, %id, "cascade delete");
        Persister::new(&self.catalog, &self.dialect, self.source.as_ref())
            .delete_cascade(self.entity.clone(), id.clone())
            .await
    }

    async fn mass_update(&self, update: UpdateSet, filter: Option<QueryFilter>) -> Result<u64, MapperError> {
        let mut mapping = Mapping::new(&self.catalog, &self.entity)?;
        for field in update.operations.keys() {
            mapping.add_attribute(&self.catalog, field)?;
        }
        for path in filter.iter().flat_map(QueryFilter::paths) {
            mapping.add_attribute(&self.catalog, path)?;
        }
        let statement =
            SqlGenerator::new(&self.catalog, &self.dialect).build_mass_update(&mapping, &update, filter.as_ref())?;
        self.source.execute(&statement).await
    }
}
