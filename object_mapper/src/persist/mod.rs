//! Persistence orchestrator
//!
//! Walks an entity graph from a root and writes it one statement at a time:
//! pre-write deletions and reference checks, the row itself, then external
//! FKs, children, link rows and scalar collections. References to entities
//! that are still unsaved are written as `NULL` and patched once the whole
//! graph has ids.
//!
//! Statements are not wrapped in a transaction. Callers that need the graph
//! written atomically own that scope.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashSet;

use crate::catalog::{FieldDescriptor, IdStrategy, RelationKind, SchemaCatalog};
use crate::connection::ConnectionSource;
use crate::dialect::Dialect;
use crate::entity::{EntityKey, FieldValue, LoadedState, ObjectGraph};
use crate::errors::MapperError;
use crate::id_type::UniversalId;
use crate::mapping::{join_path, Mapping, KEY_FIELD, SORT_FIELD};
use crate::query_builder::{CollectionRow, RowValues, SqlGenerator};

#[cfg(test)]
mod tests;

/// FK write deferred until the referenced entity has an id
#[derive(Debug, Clone)]
struct PendingUpdate {
    path: String,
    owner: EntityKey,
    field: String,
    target: EntityKey,
}

/// Link columns a child row carries for its parent, and those it had when loaded
#[derive(Debug, Clone, Default)]
struct ParentLink {
    columns: Vec<(String, Value)>,
    previous: Option<Vec<(String, Value)>>,
}

/// Writes one entity graph per call
pub struct Persister<'a> {
    catalog: &'a SchemaCatalog,
    dialect: &'a Dialect,
    source: &'a dyn ConnectionSource,
    written: HashSet<(String, UniversalId)>,
    visited: HashSet<EntityKey>,
    written_keys: Vec<EntityKey>,
    pending: Vec<PendingUpdate>,
    detached: Vec<EntityKey>,
}

impl<'a> Persister<'a> {
    pub fn new(catalog: &'a SchemaCatalog, dialect: &'a Dialect, source: &'a dyn ConnectionSource) -> Self {
        Self {
            catalog,
            dialect,
            source,
            written: HashSet::new(),
            visited: HashSet::new(),
            written_keys: Vec::new(),
            pending: Vec::new(),
            detached: Vec::new(),
        }
    }

    /// Write the graph reachable from `root`, assigning ids in place.
    ///
    /// Every written entity gets its loaded snapshot refreshed, so persisting
    /// the same graph again only writes what changed in between.
    pub async fn persist(mut self, graph: &mut ObjectGraph, root: EntityKey) -> Result<(), MapperError> {
        let root_type = graph.get(root).type_name().to_string();
        let mut mapping = Mapping::new(self.catalog, &root_type)?;
        self.visit(graph, &mut mapping, String::new(), root, ParentLink::default(), false)
            .await?;

        // Unsaved inner-association targets outside the composition tree
        while let Some(target) = self.detached.pop() {
            if self.visited.contains(&target) {
                continue;
            }
            let target_type = graph.get(target).type_name().to_string();
            let mut target_mapping = Mapping::new(self.catalog, &target_type)?;
            self.visit(graph, &mut target_mapping, String::new(), target, ParentLink::default(), false)
                .await?;
        }

        self.resolve_pending(graph).await?;
        for key in &self.written_keys {
            graph.get_mut(*key).capture_loaded();
        }
        crate::debug_log!("Persisted {} entities from {}", self.written_keys.len(), root_type);
        Ok(())
    }

    fn visit<'s>(
        &'s mut self,
        graph: &'s mut ObjectGraph,
        mapping: &'s mut Mapping,
        path: String,
        key: EntityKey,
        link: ParentLink,
        force_new: bool,
    ) -> BoxFuture<'s, Result<(), MapperError>> {
        Box::pin(async move {
            if !self.visited.insert(key) {
                return Ok(());
            }
            let catalog = self.catalog;
            let entity = graph.get(key);
            let type_name = entity.type_name().to_string();
            let descriptor = catalog.entity(&type_name)?;
            if let Some(id) = entity.universal_id() {
                if self.written.contains(&(type_name.clone(), id)) {
                    return Ok(());
                }
            }

            let is_new = force_new
                || entity.id().is_none()
                || (entity.loaded().is_none() && descriptor.id_strategy != IdStrategy::Generated);
            if !is_new && entity.loaded().is_none() {
                return Err(MapperError::NotLoadedForUpdate {
                    entity: type_name,
                    id: entity.id().map(Value::to_string).unwrap_or_default(),
                });
            }
            let previous = if is_new { None } else { entity.loaded().cloned() };
            mapping.ensure_write_fields(catalog, &path)?;

            let mut row = RowValues::default();
            for field in descriptor.scalar_fields() {
                let Some(value) = graph.get(key).scalar(&field.name) else {
                    continue;
                };
                let unchanged = previous
                    .as_ref()
                    .and_then(|p| p.fields.get(&field.name))
                    .is_some_and(|old| *old == FieldValue::Scalar(value.clone()));
                if !unchanged {
                    row.fields.push((field.name.clone(), value.clone()));
                }
            }

            self.check_references(graph, &path, key, &mut row, previous.as_ref(), is_new)?;
            for (field, rel) in descriptor.relation_fields() {
                if rel.kind.is_composition() {
                    if let Some(previous) = &previous {
                        self.delete_removed_children(graph, mapping, &path, key, field, previous)
                            .await?;
                    }
                }
            }

            let mut collections = Vec::new();
            for (field, _) in descriptor.collection_fields() {
                let Some(current) = graph.get(key).get(&field.name).cloned() else {
                    continue;
                };
                if previous.as_ref().and_then(|p| p.fields.get(&field.name)) == Some(&current) {
                    continue;
                }
                if !is_new {
                    self.clear_collection(graph, mapping, &path, key, &field.name).await?;
                }
                collections.push((field.name.clone(), current));
            }

            for (column, value) in link.columns {
                let unchanged = link
                    .previous
                    .as_ref()
                    .is_some_and(|old| old.iter().any(|(c, v)| *c == column && *v == value));
                if is_new || !unchanged {
                    row.links.push((column, value));
                }
            }

            let id = self.write_row(graph, mapping, &path, key, row, is_new).await?;

            for (field, rel) in descriptor.relation_fields() {
                let field_path = join_path(&path, &field.name);
                if graph.get(key).get(&field.name).is_none() {
                    continue;
                }
                match rel.kind {
                    RelationKind::Association if rel.owner_column.is_none() => {
                        self.reconcile_external(graph, mapping, &field_path, key, field, &id, previous.as_ref())
                            .await?;
                    }
                    RelationKind::Composition | RelationKind::CompositionTree => {
                        self.write_children(graph, mapping, &field_path, key, field, &id, previous.as_ref(), is_new)
                            .await?;
                    }
                    RelationKind::ManyToMany => {
                        self.sync_links(graph, mapping, &field_path, key, field, &id, previous.as_ref())
                            .await?;
                    }
                    RelationKind::InnerAssociation => {
                        // Composition children need their parent row; left to resolve_pending
                        if let Some(target) = graph.get(key).reference(&field.name) {
                            let target_entity = graph.get(target);
                            if target_entity.id().is_none()
                                && !self.catalog.is_composition_owned(target_entity.type_name())
                            {
                                self.detached.push(target);
                            }
                        }
                    }
                    _ => {}
                }
            }

            for (field, value) in collections {
                self.write_collection(mapping, &join_path(&path, &field), &id, &field, value)
                    .await?;
            }
            Ok(())
        })
    }

    /// Locally held FKs: validate targets and add changed FK columns to `row`
    fn check_references(
        &mut self,
        graph: &ObjectGraph,
        path: &str,
        key: EntityKey,
        row: &mut RowValues,
        previous: Option<&LoadedState>,
        is_new: bool,
    ) -> Result<(), MapperError> {
        let catalog = self.catalog;
        let entity = graph.get(key);
        let type_name = entity.type_name();
        let descriptor = catalog.entity(type_name)?;
        let mut parents = 0;

        for (field, rel) in descriptor.relation_fields() {
            if rel.owner_column.is_none() || rel.kind.is_composition() {
                continue;
            }
            let Some(current) = entity.get(&field.name) else {
                if rel.required && is_new {
                    return Err(MapperError::validation(type_name, &field.name, "required reference is not set"));
                }
                continue;
            };
            let FieldValue::Reference(target) = current else {
                return Err(MapperError::validation(type_name, &field.name, "expected a single reference"));
            };
            if rel.required && target.is_none() {
                return Err(MapperError::validation(type_name, &field.name, "required reference is empty"));
            }
            if rel.kind == RelationKind::ParentAssociation && target.is_some() {
                parents += 1;
                if parents > 1 {
                    return Err(MapperError::validation(
                        type_name,
                        &field.name,
                        "more than one parent association is set",
                    ));
                }
            }

            let value = match target.map(|t| (t, graph.get(t).id())) {
                None => Value::Null,
                Some((_, Some(id))) => id.clone(),
                Some((unsaved, None)) => match rel.kind {
                    RelationKind::ParentAssociation | RelationKind::Association => {
                        return Err(MapperError::validation(
                            type_name,
                            &field.name,
                            "referenced entity has not been persisted",
                        ));
                    }
                    RelationKind::InnerAssociation => {
                        tracing::debug!(entity = type_name, field = %field.name, "deferring reference to unsaved entity");
                        self.pending.push(PendingUpdate {
                            path: join_path(path, &field.name),
                            owner: key,
                            field: field.name.clone(),
                            target: unsaved,
                        });
                        Value::Null
                    }
                    RelationKind::WeakAssociation => {
                        tracing::debug!(
                            entity = type_name,
                            field = %field.name,
                            "dropping reference to unsaved weak association target"
                        );
                        Value::Null
                    }
                    _ => Value::Null,
                },
            };

            let old = previous
                .and_then(|p| p.fields.get(&field.name))
                .map(|old| reference_id(graph, old));
            if is_new || old.as_ref() != Some(&value) {
                row.fields.push((field.name.clone(), value));
            }
        }
        Ok(())
    }

    async fn write_row(
        &mut self,
        graph: &mut ObjectGraph,
        mapping: &Mapping,
        path: &str,
        key: EntityKey,
        mut row: RowValues,
        is_new: bool,
    ) -> Result<Value, MapperError> {
        let catalog = self.catalog;
        let type_name = graph.get(key).type_name().to_string();
        let descriptor = catalog.entity(&type_name)?;
        let sql = SqlGenerator::new(catalog, self.dialect);

        if is_new {
            if graph.get(key).id().is_none() {
                match descriptor.id_strategy {
                    IdStrategy::Uuid => graph.assign_id(key, Value::String(uuid::Uuid::new_v4().to_string())),
                    IdStrategy::Assigned => {
                        return Err(MapperError::validation(
                            &type_name,
                            &descriptor.id_field,
                            "id must be assigned before insert",
                        ));
                    }
                    IdStrategy::Generated => {}
                }
            }
            row.id = graph.get(key).id().cloned();
            let statement = sql.build_insert(mapping, path, &row)?;
            let generated = self.source.insert(&statement).await?;
            if row.id.is_none() {
                let id = generated.ok_or_else(|| {
                    MapperError::Database(format!("insert into {} returned no generated key", type_name))
                })?;
                graph.assign_id(key, id);
            }
        } else if let Some(id) = graph.get(key).id().cloned() {
            if let Some(statement) = sql.build_update(mapping, path, &id, &row)? {
                self.source.execute(&statement).await?;
            }
        }

        let id = graph
            .get(key)
            .id()
            .cloned()
            .ok_or_else(|| MapperError::validation(&type_name, &descriptor.id_field, "no id after write"))?;
        if let Some(universal) = UniversalId::from_value(&id) {
            self.written.insert((type_name, universal));
        }
        self.written_keys.push(key);
        Ok(id)
    }

    /// Delete children present in the loaded snapshot but gone from the current value
    async fn delete_removed_children(
        &self,
        graph: &ObjectGraph,
        mapping: &mut Mapping,
        path: &str,
        key: EntityKey,
        field: &FieldDescriptor,
        previous: &LoadedState,
    ) -> Result<(), MapperError> {
        let Some(old) = previous.fields.get(&field.name) else {
            return Ok(());
        };
        let current: HashSet<UniversalId> = graph
            .get(key)
            .related(&field.name)
            .into_iter()
            .filter_map(|k| graph.get(k).universal_id())
            .collect();
        let field_path = join_path(path, &field.name);
        mapping.ensure_table(self.catalog, &field_path)?;
        let child_type = mapping.entity_at(&field_path)?;

        for child in old.entity_keys() {
            let entity = graph.get(child);
            let (Some(id), Some(universal)) = (entity.id(), entity.universal_id()) else {
                continue;
            };
            if !current.contains(&universal) {
                tracing::debug!(entity = %child_type, id = %id, "deleting removed child");
                self.delete_cascade(child_type.clone(), id.clone()).await?;
            }
        }
        Ok(())
    }

    async fn clear_collection(
        &self,
        graph: &ObjectGraph,
        mapping: &mut Mapping,
        path: &str,
        key: EntityKey,
        field: &str,
    ) -> Result<(), MapperError> {
        let Some(owner_id) = graph.get(key).id() else {
            return Ok(());
        };
        let field_path = join_path(path, field);
        mapping.ensure_collection(self.catalog, &field_path)?;
        let sql = SqlGenerator::new(self.catalog, self.dialect);
        let statement = sql.build_delete_collection(mapping, &format!("@{}", field_path), owner_id)?;
        self.source.execute(&statement).await?;
        Ok(())
    }

    /// FK held by the target: point new targets at the owner, clear dropped ones
    #[allow(clippy::too_many_arguments)]
    async fn reconcile_external(
        &self,
        graph: &ObjectGraph,
        mapping: &mut Mapping,
        field_path: &str,
        key: EntityKey,
        field: &FieldDescriptor,
        owner_id: &Value,
        previous: Option<&LoadedState>,
    ) -> Result<(), MapperError> {
        let type_name = graph.get(key).type_name();
        let mut current = Vec::new();
        for target in graph.get(key).related(&field.name) {
            let id = graph.get(target).id().cloned().ok_or_else(|| {
                MapperError::validation(type_name, &field.name, "referenced entity has not been persisted")
            })?;
            current.push(id);
        }
        let old: Vec<Value> = previous
            .and_then(|p| p.fields.get(&field.name))
            .map(|v| v.entity_keys())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|k| graph.get(k).id().cloned())
            .collect();

        mapping.ensure_table(self.catalog, field_path)?;
        let sql = SqlGenerator::new(self.catalog, self.dialect);
        for id in current.iter().filter(|id| !old.contains(id)) {
            let statement = sql.build_update_external_fk(mapping, field_path, id, Some(owner_id))?;
            self.source.execute(&statement).await?;
        }
        for id in old.iter().filter(|id| !current.contains(id)) {
            let statement = sql.build_update_external_fk(mapping, field_path, id, None)?;
            self.source.execute(&statement).await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_children(
        &mut self,
        graph: &mut ObjectGraph,
        mapping: &mut Mapping,
        field_path: &str,
        key: EntityKey,
        field: &FieldDescriptor,
        owner_id: &Value,
        previous: Option<&LoadedState>,
        is_new: bool,
    ) -> Result<(), MapperError> {
        mapping.ensure_table(self.catalog, field_path)?;
        let node = mapping.table(field_path)?;
        let fk = node
            .column
            .clone()
            .ok_or_else(|| MapperError::UnknownPath(field_path.to_string()))?;
        let sort = mapping.relation_field(field_path, SORT_FIELD).map(|f| f.column.clone());
        let map_key = mapping.relation_field(field_path, KEY_FIELD).cloned();

        let children = keyed_entries(graph.get(key).get(&field.name));
        let prior = keyed_entries(previous.and_then(|p| p.fields.get(&field.name)));
        let link_for = |index: usize, entry_key: Option<&Value>| -> Result<Vec<(String, Value)>, MapperError> {
            let mut columns = vec![(fk.clone(), owner_id.clone())];
            if let Some(column) = &sort {
                columns.push((column.clone(), Value::from(index)));
            }
            if let (Some(node), Some(value)) = (&map_key, entry_key) {
                let encoded = self
                    .catalog
                    .encode(&field.name, node.converter.as_deref(), None, value)?;
                columns.push((node.column.clone(), encoded));
            }
            Ok(columns)
        };

        let mut links = Vec::with_capacity(children.len());
        for (index, (entry_key, child)) in children.iter().enumerate() {
            let columns = link_for(index, entry_key.as_ref())?;
            let previous = prior
                .iter()
                .position(|(_, k)| k == child)
                .map(|old_index| link_for(old_index, prior[old_index].0.as_ref()))
                .transpose()?;
            links.push((*child, ParentLink { columns, previous }));
        }
        for (child, link) in links {
            self.visit(graph, mapping, field_path.to_string(), child, link, is_new)
                .await?;
        }
        Ok(())
    }

    /// Insert missing link rows, then drop links no longer referenced.
    ///
    /// A link set equal to the loaded snapshot issues no statements.
    #[allow(clippy::too_many_arguments)]
    async fn sync_links(
        &self,
        graph: &ObjectGraph,
        mapping: &mut Mapping,
        field_path: &str,
        key: EntityKey,
        field: &FieldDescriptor,
        owner_id: &Value,
        previous: Option<&LoadedState>,
    ) -> Result<(), MapperError> {
        let current = graph.get(key).get(&field.name);
        if previous.is_some_and(|p| p.fields.get(&field.name) == current) {
            return Ok(());
        }
        mapping.ensure_table(self.catalog, field_path)?;
        let link_path = format!(".{}", field_path);
        let sort = mapping.field(&link_path, SORT_FIELD).map(|f| f.column.clone());
        let map_key = mapping.field(&link_path, KEY_FIELD).cloned();
        let sql = SqlGenerator::new(self.catalog, self.dialect);
        let type_name = graph.get(key).type_name();

        let mut keep = Vec::new();
        for (index, (entry_key, target)) in keyed_entries(graph.get(key).get(&field.name)).into_iter().enumerate() {
            let target_id = graph.get(target).id().cloned().ok_or_else(|| {
                MapperError::validation(type_name, &field.name, "linked entity has not been persisted")
            })?;
            let existing = sql.build_many_to_many_select(mapping, field_path, owner_id, Some(&target_id))?;
            if self.source.fetch(&existing).await?.is_empty() {
                let mut extras = Vec::new();
                if let Some(column) = &sort {
                    extras.push((column.clone(), Value::from(index)));
                }
                if let (Some(node), Some(value)) = (&map_key, &entry_key) {
                    let encoded = self
                        .catalog
                        .encode(&field.name, node.converter.as_deref(), None, value)?;
                    extras.push((node.column.clone(), encoded));
                }
                let insert = sql.build_many_to_many_insert(mapping, field_path, owner_id, &target_id, &extras)?;
                self.source.execute(&insert).await?;
            }
            keep.push(target_id);
        }

        if previous.is_some() {
            let delete = sql.build_many_to_many_delete(mapping, field_path, owner_id, &keep)?;
            self.source.execute(&delete).await?;
        }
        Ok(())
    }

    async fn write_collection(
        &self,
        mapping: &mut Mapping,
        field_path: &str,
        owner_id: &Value,
        field: &str,
        value: FieldValue,
    ) -> Result<(), MapperError> {
        mapping.ensure_collection(self.catalog, field_path)?;
        let rows: Vec<CollectionRow> = match value {
            FieldValue::ScalarList(values) => values
                .into_iter()
                .enumerate()
                .map(|(index, value)| CollectionRow { value, key: None, index: Some(index) })
                .collect(),
            FieldValue::ScalarSet(values) => values
                .into_iter()
                .map(|value| CollectionRow { value, key: None, index: None })
                .collect(),
            FieldValue::ScalarMap(entries) => entries
                .into_iter()
                .map(|(key, value)| CollectionRow { value, key: Some(key), index: None })
                .collect(),
            _ => {
                return Err(MapperError::validation(
                    mapping.root_entity(),
                    field,
                    "expected a scalar collection value",
                ));
            }
        };
        let sql = SqlGenerator::new(self.catalog, self.dialect);
        if let Some(statement) =
            sql.build_insert_collection_rows(mapping, &format!("@{}", field_path), owner_id, &rows)?
        {
            self.source.execute(&statement).await?;
        }
        Ok(())
    }

    async fn resolve_pending(&mut self, graph: &ObjectGraph) -> Result<(), MapperError> {
        let sql = SqlGenerator::new(self.catalog, self.dialect);
        for pending in std::mem::take(&mut self.pending) {
            let owner = graph.get(pending.owner);
            let missing = || MapperError::PendingUpdate {
                entity: owner.type_name().to_string(),
                field: pending.field.clone(),
            };
            let owner_id = owner.id().ok_or_else(missing)?;
            let target_id = graph.get(pending.target).id().ok_or_else(missing)?;

            let mut mapping = Mapping::new(self.catalog, owner.type_name())?;
            mapping.ensure_write_fields(self.catalog, "")?;
            let statement = sql.build_update_internal_fk(&mapping, "", &pending.field, owner_id, target_id)?;
            self.source.execute(&statement).await?;
            tracing::debug!(path = %pending.path, target = %target_id, "resolved pending reference");
        }
        Ok(())
    }

    /// Delete an entity row after its children, link rows and collection rows.
    ///
    /// Children are found in the database, not in memory. A foreign key still
    /// pointing at the row surfaces as [`MapperError::InUse`].
    pub fn delete_cascade<'s>(&'s self, entity_type: String, id: Value) -> BoxFuture<'s, Result<u64, MapperError>> {
        Box::pin(async move {
            let catalog = self.catalog;
            let descriptor = catalog.entity(&entity_type)?;
            let mut mapping = Mapping::new(catalog, &entity_type)?;
            let sql = SqlGenerator::new(catalog, self.dialect);

            for (field, rel) in descriptor.relation_fields() {
                match rel.kind {
                    kind if kind.is_composition() => {
                        mapping.ensure_table(catalog, &field.name)?;
                        let child_type = mapping.entity_at(&field.name)?;
                        let select = sql.build_select_child_ids(&mapping, &field.name, &id)?;
                        for row in self.source.fetch(&select).await? {
                            if let Some(child_id) = row.first().filter(|v| !v.is_null()) {
                                self.delete_cascade(child_type.clone(), child_id.clone()).await?;
                            }
                        }
                    }
                    RelationKind::ManyToMany => {
                        mapping.ensure_table(catalog, &field.name)?;
                        let unlink = sql.build_many_to_many_delete(&mapping, &field.name, &id, &[])?;
                        self.source.execute(&unlink).await?;
                    }
                    _ => {}
                }
            }
            for (field, _) in descriptor.collection_fields() {
                mapping.ensure_collection(catalog, &field.name)?;
                let clear = sql.build_delete_collection(&mapping, &format!("@{}", field.name), &id)?;
                self.source.execute(&clear).await?;
            }

            let affected = self.source.execute(&sql.build_delete(&mapping, "", &id)?).await?;
            tracing::debug!(entity = %entity_type, id = %id, affected, "deleted entity");
            Ok(affected)
        })
    }
}

/// Id of the entity a loaded reference pointed at, `Null` when empty
fn reference_id(graph: &ObjectGraph, value: &FieldValue) -> Value {
    match value {
        FieldValue::Reference(Some(key)) => graph.get(*key).id().cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Entities of a relationship value with their map keys
fn keyed_entries(value: Option<&FieldValue>) -> Vec<(Option<Value>, EntityKey)> {
    match value {
        Some(FieldValue::Map(entries)) => entries.iter().map(|(k, e)| (Some(k.clone()), *e)).collect(),
        Some(other) => other.entity_keys().into_iter().map(|e| (None, e)).collect(),
        None => Vec::new(),
    }
}
