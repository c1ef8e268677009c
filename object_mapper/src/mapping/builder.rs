//! Mapping construction from the schema catalog

use std::collections::HashSet;

use super::{
    join_path, split_path, FieldNode, FieldRole, Mapping, NodeKind, TableNode, KEY_FIELD,
    PARENT_FIELD, SORT_FIELD, VALUE_FIELD,
};
use crate::catalog::{FieldKind, RelationKind, SchemaCatalog};
use crate::errors::MapperError;

impl Mapping {
    /// Mapping holding only the root table and its id
    pub fn new(catalog: &SchemaCatalog, root_entity: &str) -> Result<Self, MapperError> {
        let descriptor = catalog.entity(root_entity)?;
        let table = catalog.table_for(descriptor);
        let mut mapping = Mapping {
            root_entity: root_entity.to_string(),
            tables: Vec::new(),
            fields: Vec::new(),
            next_alias: 0,
        };
        let alias = mapping.allocate_alias();
        mapping.register_table(TableNode {
            entity: Some(root_entity.to_string()),
            path: String::new(),
            schema: table.schema,
            table: table.table,
            alias: alias.clone(),
            join_alias: None,
            column: None,
            join_column: None,
            id_column: Some(descriptor.id_column.clone()),
            relation: None,
            field: None,
        })?;
        mapping.register_field(FieldNode {
            path: String::new(),
            field: descriptor.id_field.clone(),
            alias,
            column: descriptor.id_column.clone(),
            role: FieldRole::Id,
            converter: None,
            encryption_key: None,
        })?;
        Ok(mapping)
    }

    /// Build a mapping for `root_entity` covering the requested attribute paths.
    ///
    /// `"*"` and `"items.*"` expand to every scalar of the node; a relationship
    /// path loads the target with its scalars; tree relationships are bound
    /// one level deep.
    pub fn build(catalog: &SchemaCatalog, root_entity: &str, paths: &[&str]) -> Result<Self, MapperError> {
        let mut mapping = Self::new(catalog, root_entity)?;
        for path in paths {
            mapping.add_attribute(catalog, path)?;
        }
        crate::debug_log!(
            "Built mapping for {} with {} tables and {} fields",
            root_entity,
            mapping.tables.len(),
            mapping.fields.len()
        );
        Ok(mapping)
    }

    pub fn add_attribute(&mut self, catalog: &SchemaCatalog, path: &str) -> Result<(), MapperError> {
        let path = self.collapse_tree_path(catalog, path)?;
        let (owner, field) = split_path(&path);

        if field == "*" {
            self.ensure_table(catalog, owner)?;
            return self.ensure_scalars(catalog, owner);
        }
        if path.is_empty() {
            return Ok(());
        }

        self.ensure_table(catalog, owner)?;
        let entity = self.entity_at(owner)?;
        let descriptor = catalog.entity(&entity)?;
        if field == descriptor.id_field {
            return Ok(());
        }
        let field_descriptor = catalog.field(&entity, field)?;
        match &field_descriptor.kind {
            FieldKind::Scalar { .. } => self.ensure_scalar(catalog, owner, field),
            FieldKind::Relation(_) => {
                self.ensure_table(catalog, &path)?;
                self.ensure_scalars(catalog, &path)
            }
            FieldKind::Collection(_) => self.ensure_collection(catalog, &path).map(|_| ()),
        }
    }

    /// Register the table node reached by `path`, and every node on the way.
    ///
    /// Returns the node's alias. A tree relationship below a node reached
    /// through the same tree relationship is added by replicating the
    /// previous level.
    pub fn ensure_table(&mut self, catalog: &SchemaCatalog, path: &str) -> Result<String, MapperError> {
        if let Some(node) = self.find_table(path) {
            return Ok(node.alias.clone());
        }

        let (owner_path, field) = split_path(path);
        let owner_alias = self.ensure_table(catalog, owner_path)?;
        let owner = self.table(owner_path)?.clone();
        let owner_entity = owner
            .entity
            .clone()
            .ok_or_else(|| MapperError::UnknownPath(path.to_string()))?;
        let owner_descriptor = catalog.entity(&owner_entity)?;
        let field_descriptor = catalog.field(&owner_entity, field)?;
        let rel = field_descriptor.relation().ok_or_else(|| {
            MapperError::configuration(format!("{}.{} is not a relationship", owner_entity, field))
        })?;

        if rel.kind == RelationKind::CompositionTree
            && owner.relation == Some(RelationKind::CompositionTree)
            && owner.field.as_deref() == Some(field)
        {
            self.replicate_subtree(owner_path, path)?;
            return Ok(self.table(path)?.alias.clone());
        }

        let target = catalog.resolve_entity_type(&rel.target);
        let target_descriptor = catalog.entity(&target)?;
        let target_table = catalog.table_for(target_descriptor);

        let (join_alias, column, join_column) = match rel.kind {
            RelationKind::ManyToMany => {
                let join_node_path = format!(".{}", path);
                let join_node_alias = self.allocate_alias();
                self.register_table(TableNode {
                    entity: None,
                    path: join_node_path.clone(),
                    schema: catalog.schema_for(owner_descriptor),
                    table: rel.join_table.clone().unwrap_or_default(),
                    alias: join_node_alias.clone(),
                    join_alias: Some(owner_alias),
                    column: rel.join_column.clone(),
                    join_column: Some(owner_descriptor.id_column.clone()),
                    id_column: None,
                    relation: Some(RelationKind::ManyToMany),
                    field: Some(field.to_string()),
                })?;
                self.register_relation_columns(&join_node_path, &join_node_alias, rel)?;
                (
                    join_node_alias,
                    Some(target_descriptor.id_column.clone()),
                    rel.inverse_join_column.clone(),
                )
            }
            _ => match (&rel.owner_column, &rel.counterpart_column) {
                (Some(owner_column), _) => (
                    owner_alias,
                    Some(target_descriptor.id_column.clone()),
                    Some(owner_column.clone()),
                ),
                (None, Some(counterpart)) => (
                    owner_alias,
                    Some(counterpart.clone()),
                    Some(owner_descriptor.id_column.clone()),
                ),
                (None, None) => {
                    return Err(MapperError::configuration(format!(
                        "{}.{} has no join column",
                        owner_entity, field
                    )));
                }
            },
        };

        let alias = self.allocate_alias();
        self.register_table(TableNode {
            entity: Some(target.clone()),
            path: path.to_string(),
            schema: target_table.schema,
            table: target_table.table,
            alias: alias.clone(),
            join_alias: Some(join_alias),
            column,
            join_column,
            id_column: Some(target_descriptor.id_column.clone()),
            relation: Some(rel.kind),
            field: Some(field.to_string()),
        })?;
        self.register_field(FieldNode {
            path: path.to_string(),
            field: target_descriptor.id_field.clone(),
            alias: alias.clone(),
            column: target_descriptor.id_column.clone(),
            role: FieldRole::Id,
            converter: None,
            encryption_key: None,
        })?;
        if rel.kind != RelationKind::ManyToMany {
            self.register_relation_columns(path, &alias, rel)?;
        }
        Ok(alias)
    }

    /// Sort and map-key columns live with the rows that represent the link
    fn register_relation_columns(
        &mut self,
        path: &str,
        alias: &str,
        rel: &crate::catalog::RelationDescriptor,
    ) -> Result<(), MapperError> {
        if let Some(sort) = &rel.sort_column {
            self.register_field(FieldNode {
                path: path.to_string(),
                field: SORT_FIELD.to_string(),
                alias: alias.to_string(),
                column: sort.clone(),
                role: FieldRole::Sort,
                converter: None,
                encryption_key: None,
            })?;
        }
        if let Some(key) = &rel.map_key_column {
            self.register_field(FieldNode {
                path: path.to_string(),
                field: KEY_FIELD.to_string(),
                alias: alias.to_string(),
                column: key.clone(),
                role: FieldRole::MapKey,
                converter: rel.map_key_converter.clone(),
                encryption_key: None,
            })?;
        }
        Ok(())
    }

    /// Register the auxiliary table of the scalar collection at `path`
    pub fn ensure_collection(&mut self, catalog: &SchemaCatalog, path: &str) -> Result<String, MapperError> {
        let node_path = format!("@{}", path);
        if let Some(node) = self.find_table(&node_path) {
            return Ok(node.alias.clone());
        }

        let (owner_path, field) = split_path(path);
        let owner_alias = self.ensure_table(catalog, owner_path)?;
        let owner_entity = self.entity_at(owner_path)?;
        let owner_descriptor = catalog.entity(&owner_entity)?;
        let field_descriptor = catalog.field(&owner_entity, field)?;
        let collection = field_descriptor.collection().ok_or_else(|| {
            MapperError::configuration(format!("{}.{} is not a scalar collection", owner_entity, field))
        })?;

        let alias = self.allocate_alias();
        self.register_table(TableNode {
            entity: None,
            path: node_path.clone(),
            schema: catalog.schema_for(owner_descriptor),
            table: collection.table.clone(),
            alias: alias.clone(),
            join_alias: Some(owner_alias),
            column: Some(collection.parent_column.clone()),
            join_column: Some(owner_descriptor.id_column.clone()),
            id_column: None,
            relation: None,
            field: Some(field.to_string()),
        })?;

        let mut columns = vec![
            (VALUE_FIELD, collection.value_column.clone(), FieldRole::Value, field_descriptor.converter.clone()),
            (PARENT_FIELD, collection.parent_column.clone(), FieldRole::Parent, None),
        ];
        if let Some(key) = &collection.key_column {
            columns.push((KEY_FIELD, key.clone(), FieldRole::MapKey, None));
        }
        if let Some(sort) = &collection.sort_column {
            columns.push((SORT_FIELD, sort.clone(), FieldRole::Sort, None));
        }
        for (name, column, role, converter) in columns {
            self.register_field(FieldNode {
                path: node_path.clone(),
                field: name.to_string(),
                alias: alias.clone(),
                column,
                role,
                converter,
                encryption_key: None,
            })?;
        }
        Ok(alias)
    }

    /// Register one scalar field of the entity node at `owner`
    pub fn ensure_scalar(&mut self, catalog: &SchemaCatalog, owner: &str, field: &str) -> Result<(), MapperError> {
        if self.field(owner, field).is_some() {
            return Ok(());
        }
        let alias = self.ensure_table(catalog, owner)?;
        let entity = self.entity_at(owner)?;
        let descriptor = catalog.entity(&entity)?;
        let field_descriptor = catalog.field(&entity, field)?;
        let column = catalog.column_for(descriptor, field_descriptor).ok_or_else(|| {
            MapperError::configuration(format!("{}.{} is not a scalar", entity, field))
        })?;
        self.register_field(FieldNode {
            path: owner.to_string(),
            field: field.to_string(),
            alias,
            column,
            role: FieldRole::Scalar,
            converter: field_descriptor.converter.clone(),
            encryption_key: field_descriptor.encryption_key.clone(),
        })
    }

    /// Register every scalar field of the entity node at `path`
    pub fn ensure_scalars(&mut self, catalog: &SchemaCatalog, path: &str) -> Result<(), MapperError> {
        let entity = self.entity_at(path)?;
        let names: Vec<String> = catalog
            .entity(&entity)?
            .scalar_fields()
            .map(|f| f.name.clone())
            .collect();
        for name in names {
            self.ensure_scalar(catalog, path, &name)?;
        }
        Ok(())
    }

    /// Register scalars and locally held FK columns needed to write the node at `path`
    pub fn ensure_write_fields(&mut self, catalog: &SchemaCatalog, path: &str) -> Result<(), MapperError> {
        self.ensure_table(catalog, path)?;
        self.ensure_scalars(catalog, path)?;

        let alias = self.table(path)?.alias.clone();
        let entity = self.entity_at(path)?;
        let descriptor = catalog.entity(&entity)?;
        for (field, rel) in descriptor.relation_fields() {
            let Some(owner_column) = &rel.owner_column else {
                continue;
            };
            if self.field(path, &field.name).is_some() {
                continue;
            }
            self.register_field(FieldNode {
                path: path.to_string(),
                field: field.name.clone(),
                alias: alias.clone(),
                column: owner_column.clone(),
                role: FieldRole::ForeignKey,
                converter: None,
                encryption_key: None,
            })?;
        }
        Ok(())
    }

    /// Copy the node at `original` and everything joined onto it to `destination`.
    ///
    /// The copy is joined onto the node at `destination`'s parent path, which
    /// must already exist. Used to extend tree relationships one level.
    pub fn replicate_subtree(&mut self, original: &str, destination: &str) -> Result<(), MapperError> {
        if self.find_table(destination).is_some() {
            return Err(MapperError::DuplicatePath(destination.to_string()));
        }
        let source_alias = self.table(original)?.alias.clone();
        let (parent_path, _) = split_path(destination);
        let parent_alias = self.table(parent_path)?.alias.clone();
        self.replicate_node(&source_alias, original, destination, &parent_alias)?;
        crate::debug_log!("Replicated mapping subtree '{}' to '{}'", original, destination);
        Ok(())
    }

    fn replicate_node(
        &mut self,
        source_alias: &str,
        from: &str,
        to: &str,
        join_alias: &str,
    ) -> Result<(), MapperError> {
        let source = self
            .table_by_alias(source_alias)
            .cloned()
            .ok_or_else(|| MapperError::UnknownPath(source_alias.to_string()))?;
        let children: Vec<TableNode> = self.children_of(source_alias).cloned().collect();
        let fields: Vec<FieldNode> = self.fields_of(&source.path).cloned().collect();

        let alias = self.allocate_alias();
        let path = rebase(&source.path, from, to);
        self.register_table(TableNode {
            path: path.clone(),
            alias: alias.clone(),
            join_alias: Some(join_alias.to_string()),
            ..source
        })?;
        for field in fields {
            self.register_field(FieldNode {
                path: path.clone(),
                alias: alias.clone(),
                ..field
            })?;
        }
        for child in children {
            self.replicate_node(&child.alias, from, to, &alias)?;
        }
        Ok(())
    }

    /// Re-rooted mapping containing the node at `start` and its transitive join closure
    pub fn extract_subgraph(&self, start: &str) -> Result<Mapping, MapperError> {
        let start_node = self.table(start)?;
        let entity = start_node
            .entity
            .clone()
            .ok_or_else(|| MapperError::configuration(format!("'{}' is not an entity node", start)))?;

        let mut closure = HashSet::new();
        let mut queue = vec![start_node.alias.clone()];
        while let Some(alias) = queue.pop() {
            if closure.insert(alias.clone()) {
                queue.extend(self.children_of(&alias).map(|c| c.alias.clone()));
            }
        }

        let tables = self
            .tables
            .iter()
            .filter(|t| closure.contains(&t.alias))
            .map(|t| {
                let mut node = t.clone();
                node.path = relativize(&t.path, start);
                if t.alias == start_node.alias {
                    node.join_alias = None;
                    node.column = None;
                    node.join_column = None;
                    node.relation = None;
                    node.field = None;
                }
                node
            })
            .collect();
        let fields = self
            .fields
            .iter()
            .filter(|f| closure.contains(&f.alias))
            .map(|f| FieldNode {
                path: relativize(&f.path, start),
                ..f.clone()
            })
            .filter(|f| !(f.path.is_empty() && matches!(f.role, FieldRole::Sort | FieldRole::MapKey)))
            .collect();

        Ok(Mapping {
            root_entity: entity,
            tables,
            fields,
            next_alias: self.next_alias,
        })
    }

    /// Entity type of the node at `path`
    pub fn entity_at(&self, path: &str) -> Result<String, MapperError> {
        let node = self.table(path)?;
        match node.kind() {
            NodeKind::Root | NodeKind::Entity => node
                .entity
                .clone()
                .ok_or_else(|| MapperError::UnknownPath(path.to_string())),
            _ => Err(MapperError::configuration(format!("'{}' is not an entity node", path))),
        }
    }

    /// Drop repeated tree segments: `children.children.name` reads as `children.name`
    fn collapse_tree_path(&self, catalog: &SchemaCatalog, path: &str) -> Result<String, MapperError> {
        let mut entity = self.root_entity.clone();
        let mut previous_tree: Option<&str> = None;
        let mut kept: Vec<&str> = Vec::new();

        for segment in path.split('.').filter(|s| !s.is_empty()) {
            let relation = catalog
                .entity(&entity)?
                .field(segment)
                .and_then(|f| f.relation())
                .cloned();
            match relation {
                Some(rel) if rel.kind == RelationKind::CompositionTree => {
                    if previous_tree != Some(segment) {
                        kept.push(segment);
                    }
                    previous_tree = Some(segment);
                    entity = catalog.resolve_entity_type(&rel.target);
                }
                Some(rel) => {
                    kept.push(segment);
                    previous_tree = None;
                    entity = catalog.resolve_entity_type(&rel.target);
                }
                None => {
                    kept.push(segment);
                    previous_tree = None;
                }
            }
        }
        Ok(kept.join("."))
    }
}

fn strip_marker(path: &str) -> (Option<char>, &str) {
    match path.chars().next() {
        Some(marker @ ('.' | '@')) => (Some(marker), &path[1..]),
        _ => (None, path),
    }
}

fn with_marker(marker: Option<char>, body: String) -> String {
    match marker {
        Some(m) => format!("{}{}", m, body),
        None => body,
    }
}

/// Move `path` from below `from` to below `to`
fn rebase(path: &str, from: &str, to: &str) -> String {
    let (marker, body) = strip_marker(path);
    let rest = relativize(body, from);
    let rebased = if rest.is_empty() {
        to.to_string()
    } else {
        join_path(to, &rest)
    };
    with_marker(marker, rebased)
}

/// Express `path` relative to `base`
fn relativize(path: &str, base: &str) -> String {
    let (marker, body) = strip_marker(path);
    let relative = if base.is_empty() {
        body.to_string()
    } else if body == base {
        String::new()
    } else {
        body.strip_prefix(base)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(body)
            .to_string()
    };
    with_marker(marker, relative)
}
