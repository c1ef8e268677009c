//! Result materializer
//!
//! Turns flat joined rows back into a deduplicated object graph. Each row is
//! read in two passes: the first instantiates (or finds) the entity of every
//! entity node, the second wires children into their owners. Map-valued
//! relationships are wired in a second iteration of that pass.
//!
//! Composition trees are bound one level deep by the mapping; deeper levels
//! are loaded by follow-up queries over a subgraph extracted at the tree node,
//! sharing the same graph so every `(type, id)` stays a single instance.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::catalog::{Cardinality, RelationKind, SchemaCatalog};
use crate::connection::{ConnectionSource, SqlRow};
use crate::dialect::Dialect;
use crate::entity::{EntityKey, FieldValue, ObjectGraph};
use crate::errors::MapperError;
use crate::id_type::UniversalId;
use crate::mapping::{
    join_path, FieldRole, Mapping, NodeKind, TableNode, KEY_FIELD, PARENT_FIELD, SORT_FIELD, VALUE_FIELD,
};
use crate::query_builder::{column_label, QueryBuilder, QueryFilter, SqlGenerator};


/// Per-call bookkeeping across the rows of one result
#[derive(Default)]
struct RowState {
    roots: Vec<EntityKey>,
    found: HashMap<String, Vec<EntityKey>>,
    ordered: HashMap<(EntityKey, String), SortSlots<EntityKey>>,
    ordered_values: HashMap<(EntityKey, String), SortSlots<Value>>,
}

/// List members keyed by their stored sort index; members without a usable
/// index follow in arrival order
struct SortSlots<T> {
    sorted: BTreeMap<u64, T>,
    trailing: Vec<T>,
}

impl<T> Default for SortSlots<T> {
    fn default() -> Self {
        Self {
            sorted: BTreeMap::new(),
            trailing: Vec::new(),
        }
    }
}

impl<T: PartialEq> SortSlots<T> {
    fn contains(&self, item: &T) -> bool {
        self.sorted.values().any(|v| v == item) || self.trailing.contains(item)
    }

    fn into_values(self) -> impl Iterator<Item = T> {
        self.sorted.into_values().chain(self.trailing)
    }
}

impl RowState {
    fn record(&mut self, path: &str, key: EntityKey) {
        let keys = self.found.entry(path.to_string()).or_default();
        if !keys.contains(&key) {
            keys.push(key);
        }
        if path.is_empty() && !self.roots.contains(&key) {
            self.roots.push(key);
        }
    }
}

pub struct Materializer<'a> {
    catalog: &'a SchemaCatalog,
    dialect: &'a Dialect,
    source: &'a dyn ConnectionSource,
}

impl<'a> Materializer<'a> {
    pub fn new(catalog: &'a SchemaCatalog, dialect: &'a Dialect, source: &'a dyn ConnectionSource) -> Self {
        Self {
            catalog,
            dialect,
            source,
        }
    }

    /// Run `query` over `mapping`, hydrate composition trees and return the roots in row order
    pub async fn fetch(
        &self,
        mapping: &Mapping,
        query: &QueryBuilder,
        graph: &mut ObjectGraph,
    ) -> Result<Vec<EntityKey>, MapperError> {
        let mut expanded = HashSet::new();
        self.fetch_level(mapping, query, graph, &mut expanded).await
    }

    fn fetch_level<'s>(
        &'s self,
        mapping: &'s Mapping,
        query: &'s QueryBuilder,
        graph: &'s mut ObjectGraph,
        expanded: &'s mut HashSet<(String, UniversalId)>,
    ) -> BoxFuture<'s, Result<Vec<EntityKey>, MapperError>> {
        Box::pin(async move {
            let statement = SqlGenerator::new(self.catalog, self.dialect).build_select(mapping, query)?;
            let rows = self.source.fetch(&statement).await?;
            let state = self.read_rows(&rows, mapping, graph)?;

            for node in mapping.tables() {
                if node.kind() != NodeKind::Entity || node.relation != Some(RelationKind::CompositionTree) {
                    continue;
                }
                let Some(field) = node.field.as_deref() else {
                    continue;
                };
                let deeper = join_path(&node.path, field);
                if mapping.find_table(&deeper).is_some() {
                    continue;
                }

                let mut ids = Vec::new();
                for key in state.found.get(&node.path).into_iter().flatten() {
                    let entity = graph.get(*key);
                    let (Some(id), Some(universal)) = (entity.id(), entity.universal_id()) else {
                        continue;
                    };
                    if expanded.insert((entity.type_name().to_string(), universal)) {
                        ids.push(id.clone());
                    }
                }
                if ids.is_empty() {
                    continue;
                }

                let mut extended = mapping.clone();
                extended.replicate_subtree(&node.path, &deeper)?;
                let subgraph = extended.extract_subgraph(&node.path)?;
                let id_field = subgraph
                    .id_field("")
                    .map(|f| f.field.clone())
                    .ok_or_else(|| MapperError::UnknownPath(node.path.clone()))?;
                crate::debug_log!("Hydrating {} tree nodes below '{}'", ids.len(), node.path);
                let level = QueryBuilder::new().filter(QueryFilter::in_values(&id_field, ids));
                self.fetch_level(&subgraph, &level, graph, expanded).await?;
            }
            Ok(state.roots)
        })
    }

    /// Materialize already fetched rows; returns the distinct roots in row order
    pub fn materialize(
        &self,
        rows: &[SqlRow],
        mapping: &Mapping,
        graph: &mut ObjectGraph,
    ) -> Result<Vec<EntityKey>, MapperError> {
        Ok(self.read_rows(rows, mapping, graph)?.roots)
    }

    fn read_rows(&self, rows: &[SqlRow], mapping: &Mapping, graph: &mut ObjectGraph) -> Result<RowState, MapperError> {
        let mut state = RowState::default();
        for row in rows {
            let mut row_keys: HashMap<&str, Option<EntityKey>> = HashMap::new();
            for node in mapping.tables() {
                if matches!(node.kind(), NodeKind::Root | NodeKind::Entity) {
                    if let Some(key) = self.read_entity(mapping, node, row, graph)? {
                        if let Some(found) = key {
                            state.record(&node.path, found);
                        }
                        row_keys.insert(node.alias.as_str(), key);
                    }
                }
            }
            for iteration in 0..2 {
                for node in mapping.tables().iter().filter(|t| !t.path.is_empty()) {
                    match node.kind() {
                        NodeKind::Entity => self.wire_entity(iteration, mapping, node, row, &row_keys, graph, &mut state)?,
                        NodeKind::Collection => {
                            self.wire_collection(iteration, mapping, node, row, &row_keys, graph, &mut state)?
                        }
                        _ => {}
                    }
                }
            }
        }

        for ((parent, field), slots) in std::mem::take(&mut state.ordered) {
            let mut keys = match graph.get(parent).get(&field) {
                Some(FieldValue::List(keys)) => keys.clone(),
                _ => Vec::new(),
            };
            for key in slots.into_values() {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
            graph.get_mut(parent).set(&field, FieldValue::List(keys));
        }
        for ((parent, field), slots) in std::mem::take(&mut state.ordered_values) {
            let values = slots.into_values().collect();
            graph.get_mut(parent).set(&field, FieldValue::ScalarList(values));
        }
        crate::trace_log!("Materialized {} rows into {} roots", rows.len(), state.roots.len());
        Ok(state)
    }

    /// Pass A for one node.
    ///
    /// `None` when the node's id is not in the row, `Some(None)` when the row
    /// holds no entity for it (outer-join miss).
    fn read_entity(
        &self,
        mapping: &Mapping,
        node: &TableNode,
        row: &SqlRow,
        graph: &mut ObjectGraph,
    ) -> Result<Option<Option<EntityKey>>, MapperError> {
        let Some(id_field) = mapping.id_field(&node.path) else {
            return Ok(None);
        };
        let Some(id) = row.get(&column_label(&node.alias, &id_field.column)) else {
            return Ok(None);
        };
        if id.is_null() {
            return Ok(Some(None));
        }
        let entity_type = node
            .entity
            .as_deref()
            .ok_or_else(|| MapperError::UnknownPath(node.path.clone()))?;

        let key = match graph.find(entity_type, id) {
            Some(key) => key,
            None => {
                let mut entity = self.catalog.instantiate(entity_type);
                entity.set_id(id.clone());
                graph.add(entity)
            }
        };
        for field in mapping.fields_of(&node.path).filter(|f| f.role == FieldRole::Scalar) {
            if graph.get(key).get(&field.field).is_some() {
                continue;
            }
            if let Some(raw) = row.get(&column_label(&field.alias, &field.column)) {
                let value = self.catalog.decode(
                    &field.field,
                    field.converter.as_deref(),
                    field.encryption_key.as_deref(),
                    raw,
                )?;
                graph.set_scalar(key, &field.field, value);
            }
        }
        Ok(Some(Some(key)))
    }

    /// Owner instance and declaring field of a non-root node in this row
    fn owner_in_row(
        mapping: &Mapping,
        node: &TableNode,
        row_keys: &HashMap<&str, Option<EntityKey>>,
    ) -> Option<(EntityKey, String, String)> {
        let owner = mapping.owner_of(node)?;
        let parent = (*row_keys.get(owner.alias.as_str())?)?;
        Some((parent, owner.entity.clone()?, node.field.clone()?))
    }

    #[allow(clippy::too_many_arguments)]
    fn wire_entity(
        &self,
        iteration: usize,
        mapping: &Mapping,
        node: &TableNode,
        row: &SqlRow,
        row_keys: &HashMap<&str, Option<EntityKey>>,
        graph: &mut ObjectGraph,
        state: &mut RowState,
    ) -> Result<(), MapperError> {
        let Some((parent, owner_type, field)) = Self::owner_in_row(mapping, node, row_keys) else {
            return Ok(());
        };
        let rel = self.catalog.field(&owner_type, &field)?.relation().ok_or_else(|| {
            MapperError::configuration(format!("{}.{} is not a relationship", owner_type, field))
        })?;
        if (iteration == 1) != (rel.cardinality == Cardinality::Map) {
            return Ok(());
        }
        let Some(child) = row_keys.get(node.alias.as_str()).copied() else {
            return Ok(());
        };
        let Some(child) = child else {
            mark_empty(graph, parent, &field, empty_relation(rel.cardinality));
            return Ok(());
        };

        match rel.cardinality {
            Cardinality::One => graph.set_reference(parent, &field, Some(child)),
            Cardinality::Set => append_unique(graph, parent, &field, child, true),
            Cardinality::List => match mapping.relation_field(&node.path, SORT_FIELD) {
                Some(sort) => {
                    let index = row
                        .get(&column_label(&sort.alias, &sort.column))
                        .and_then(slot_index);
                    place(state.ordered.entry((parent, field)).or_default(), index, child);
                }
                None => append_unique(graph, parent, &field, child, false),
            },
            Cardinality::Map => {
                let key_field = mapping.relation_field(&node.path, KEY_FIELD).ok_or_else(|| {
                    MapperError::configuration(format!("{}.{} has no map key column", owner_type, field))
                })?;
                let raw = row
                    .get(&column_label(&key_field.alias, &key_field.column))
                    .cloned()
                    .unwrap_or(Value::Null);
                let map_key = self
                    .catalog
                    .decode(&field, key_field.converter.as_deref(), None, &raw)?;
                let mut entries = match graph.get(parent).get(&field) {
                    Some(FieldValue::Map(entries)) => entries.clone(),
                    _ => Vec::new(),
                };
                if !entries.iter().any(|(k, _)| *k == map_key) {
                    entries.push((map_key, child));
                }
                graph.get_mut(parent).set(&field, FieldValue::Map(entries));
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn wire_collection(
        &self,
        iteration: usize,
        mapping: &Mapping,
        node: &TableNode,
        row: &SqlRow,
        row_keys: &HashMap<&str, Option<EntityKey>>,
        graph: &mut ObjectGraph,
        state: &mut RowState,
    ) -> Result<(), MapperError> {
        let Some((parent, owner_type, field)) = Self::owner_in_row(mapping, node, row_keys) else {
            return Ok(());
        };
        let collection = self.catalog.field(&owner_type, &field)?.collection().ok_or_else(|| {
            MapperError::configuration(format!("{}.{} is not a scalar collection", owner_type, field))
        })?;
        if (iteration == 1) != (collection.cardinality == Cardinality::Map) {
            return Ok(());
        }
        let label = |pseudo: &str| {
            mapping
                .field(&node.path, pseudo)
                .map(|f| (f, column_label(&f.alias, &f.column)))
        };
        let Some(owner_id) = label(PARENT_FIELD).and_then(|(_, l)| row.get(&l)) else {
            return Ok(());
        };
        if owner_id.is_null() {
            mark_empty(graph, parent, &field, empty_collection(collection.cardinality));
            return Ok(());
        }

        let (value_field, value_label) = label(VALUE_FIELD)
            .ok_or_else(|| MapperError::UnknownPath(format!("{}{}", node.path, VALUE_FIELD)))?;
        let raw = row.get(&value_label).cloned().unwrap_or(Value::Null);
        let value = self.catalog.decode(
            &field,
            value_field.converter.as_deref(),
            value_field.encryption_key.as_deref(),
            &raw,
        )?;

        match collection.cardinality {
            Cardinality::Map => {
                let map_key = label(KEY_FIELD)
                    .and_then(|(_, l)| row.get(&l).cloned())
                    .unwrap_or(Value::Null);
                let mut entries = match graph.get(parent).get(&field) {
                    Some(FieldValue::ScalarMap(entries)) => entries.clone(),
                    _ => Vec::new(),
                };
                if !entries.iter().any(|(k, _)| *k == map_key) {
                    entries.push((map_key, value));
                }
                graph.get_mut(parent).set(&field, FieldValue::ScalarMap(entries));
            }
            Cardinality::Set => {
                let mut values = scalar_values(graph, parent, &field);
                if !values.contains(&value) {
                    values.push(value);
                }
                graph.get_mut(parent).set(&field, FieldValue::ScalarSet(values));
            }
            Cardinality::List | Cardinality::One => match label(SORT_FIELD) {
                Some((_, sort_label)) => {
                    let index = row.get(&sort_label).and_then(slot_index);
                    let slots = state.ordered_values.entry((parent, field)).or_default();
                    match index {
                        Some(index) => {
                            slots.sorted.insert(index, value);
                        }
                        None => slots.trailing.push(value),
                    }
                }
                // Join fan-out repeats values, so unsorted lists keep each value once
                None => {
                    let mut values = scalar_values(graph, parent, &field);
                    if !values.contains(&value) {
                        values.push(value);
                    }
                    graph.get_mut(parent).set(&field, FieldValue::ScalarList(values));
                }
            },
        }
        Ok(())
    }
}

fn slot_index(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Put `child` at its sort index; rows repeated by the join fan-out are ignored
fn place(slots: &mut SortSlots<EntityKey>, index: Option<u64>, child: EntityKey) {
    if slots.contains(&child) {
        return;
    }
    match index {
        Some(index) if !slots.sorted.contains_key(&index) => {
            slots.sorted.insert(index, child);
        }
        _ => slots.trailing.push(child),
    }
}

fn append_unique(graph: &mut ObjectGraph, parent: EntityKey, field: &str, child: EntityKey, as_set: bool) {
    let entity = graph.get_mut(parent);
    let mut keys = match entity.get(field) {
        Some(FieldValue::List(keys)) | Some(FieldValue::Set(keys)) => keys.clone(),
        _ => Vec::new(),
    };
    if !keys.contains(&child) {
        keys.push(child);
    }
    entity.set(field, if as_set { FieldValue::Set(keys) } else { FieldValue::List(keys) });
}

fn scalar_values(graph: &ObjectGraph, parent: EntityKey, field: &str) -> Vec<Value> {
    match graph.get(parent).get(field) {
        Some(FieldValue::ScalarList(values)) | Some(FieldValue::ScalarSet(values)) => values.clone(),
        _ => Vec::new(),
    }
}

/// Record "looked, found nothing" unless the field already holds a value
fn mark_empty(graph: &mut ObjectGraph, parent: EntityKey, field: &str, empty: FieldValue) {
    if graph.get(parent).get(field).is_none() {
        graph.get_mut(parent).set(field, empty);
    }
}

fn empty_relation(cardinality: Cardinality) -> FieldValue {
    match cardinality {
        Cardinality::One => FieldValue::Reference(None),
        Cardinality::List => FieldValue::List(Vec::new()),
        Cardinality::Set => FieldValue::Set(Vec::new()),
        Cardinality::Map => FieldValue::Map(Vec::new()),
    }
}

fn empty_collection(cardinality: Cardinality) -> FieldValue {
    match cardinality {
        Cardinality::Set => FieldValue::ScalarSet(Vec::new()),
        Cardinality::Map => FieldValue::ScalarMap(Vec::new()),
        Cardinality::List | Cardinality::One => FieldValue::ScalarList(Vec::new()),
    }
}
