//! INSERT, UPDATE and DELETE rendering for single tables of a mapping

use config::DialectKind;
use serde_json::Value;

use crate::errors::MapperError;
use crate::mapping::{join_path, FieldNode, Mapping, KEY_FIELD, PARENT_FIELD, SORT_FIELD, VALUE_FIELD};
use crate::query_builder::filter::QueryFilter;
use crate::query_builder::join::JoinType;
use crate::query_builder::sql_generation::{Params, SqlGenerator};
use crate::query_builder::statement::{column_label, Statement};
use crate::query_builder::update::{UpdateOperation, UpdateSet};

/// Column values of one row to write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowValues {
    /// Explicit id; omitted from inserts when absent
    pub id: Option<Value>,
    /// Object values by field name, converted and encrypted before binding
    pub fields: Vec<(String, Value)>,
    /// Raw column values (parent FK, sort index, map key); override same-named field columns
    pub links: Vec<(String, Value)>,
}

impl RowValues {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.links.is_empty()
    }
}

/// One row of a scalar collection
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRow {
    pub value: Value,
    pub key: Option<Value>,
    pub index: Option<usize>,
}

fn upsert(columns: &mut Vec<(String, Value)>, column: &str, value: Value) {
    match columns.iter_mut().find(|(c, _)| c == column) {
        Some(existing) => existing.1 = value,
        None => columns.push((column.to_string(), value)),
    }
}

impl<'a> SqlGenerator<'a> {
    fn field_node<'m>(&self, mapping: &'m Mapping, path: &str, field: &str) -> Result<&'m FieldNode, MapperError> {
        mapping
            .field(path, field)
            .ok_or_else(|| MapperError::UnknownPath(join_path(path, field)))
    }

    fn id_node<'m>(&self, mapping: &'m Mapping, path: &str) -> Result<&'m FieldNode, MapperError> {
        mapping
            .id_field(path)
            .ok_or_else(|| MapperError::UnknownPath(path.to_string()))
    }

    fn encode_field(&self, field: &FieldNode, value: &Value) -> Result<Value, MapperError> {
        self.catalog.encode(
            &field.field,
            field.converter.as_deref(),
            field.encryption_key.as_deref(),
            value,
        )
    }

    /// Owned columns of the node at `path`, in row order, already encoded
    fn row_columns(&self, mapping: &Mapping, path: &str, row: &RowValues) -> Result<Vec<(String, Value)>, MapperError> {
        let mut columns = Vec::new();
        for (name, value) in &row.fields {
            let field = self.field_node(mapping, path, name)?;
            upsert(&mut columns, &field.column, self.encode_field(field, value)?);
        }
        for (column, value) in &row.links {
            upsert(&mut columns, column, value.clone());
        }
        Ok(columns)
    }

    pub fn build_insert(&self, mapping: &Mapping, path: &str, row: &RowValues) -> Result<Statement, MapperError> {
        let node = mapping.table(path)?;
        let id = self.id_node(mapping, path)?;

        let mut columns = Vec::new();
        match &row.id {
            Some(value) => columns.push((id.column.clone(), value.clone())),
            None if !self.dialect.omit_identity_on_insert() => columns.push((id.column.clone(), Value::Null)),
            None => {}
        }
        for (column, value) in self.row_columns(mapping, path, row)? {
            upsert(&mut columns, &column, value);
        }

        let mut params = Params::new(self.dialect);
        let names: Vec<String> = columns.iter().map(|(c, _)| self.dialect.quote(c)).collect();
        let values: Vec<String> = columns.into_iter().map(|(_, v)| params.bind(v)).collect();
        let mut sql = if names.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", self.node_table(node))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.node_table(node),
                names.join(", "),
                values.join(", ")
            )
        };

        let returning = (row.id.is_none() && self.dialect.insert_returning()).then(|| id.column.clone());
        if let Some(column) = &returning {
            sql.push_str(&format!(" RETURNING {}", self.dialect.quote(column)));
        }

        let mut statement = Statement::new(sql, params.into_values());
        statement.returning = returning;
        crate::debug_log!("Built INSERT for '{}': {}", path, statement.sql);
        Ok(statement)
    }

    /// UPDATE of the given columns by id; `None` when there is nothing to set
    pub fn build_update(
        &self,
        mapping: &Mapping,
        path: &str,
        id: &Value,
        row: &RowValues,
    ) -> Result<Option<Statement>, MapperError> {
        let node = mapping.table(path)?;
        let id_field = self.id_node(mapping, path)?;
        let columns = self.row_columns(mapping, path, row)?;
        if columns.is_empty() {
            return Ok(None);
        }

        let mut params = Params::new(self.dialect);
        let sets: Vec<String> = columns
            .into_iter()
            .map(|(c, v)| format!("{} = {}", self.dialect.quote(&c), params.bind(v)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.node_table(node),
            sets.join(", "),
            self.dialect.quote(&id_field.column),
            params.bind(id.clone())
        );
        crate::debug_log!("Built UPDATE for '{}': {}", path, sql);
        Ok(Some(Statement::new(sql, params.into_values())))
    }

    pub fn build_delete(&self, mapping: &Mapping, path: &str, id: &Value) -> Result<Statement, MapperError> {
        let node = mapping.table(path)?;
        let id_field = self.id_node(mapping, path)?;
        let mut params = Params::new(self.dialect);
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            self.node_table(node),
            self.dialect.quote(&id_field.column),
            params.bind(id.clone())
        );
        let mut statement = Statement::new(sql, params.into_values());
        statement.delete_target = Some(node.table.clone());
        Ok(statement)
    }

    /// Ids of the rows of the child node at `path` owned by `parent_id`
    pub fn build_select_child_ids(
        &self,
        mapping: &Mapping,
        path: &str,
        parent_id: &Value,
    ) -> Result<Statement, MapperError> {
        let node = mapping.table(path)?;
        let id_field = self.id_node(mapping, path)?;
        let fk = node
            .column
            .as_deref()
            .ok_or_else(|| MapperError::UnknownPath(path.to_string()))?;
        let mut params = Params::new(self.dialect);
        let sql = format!(
            "SELECT {} AS {} FROM {} {} WHERE {} = {}",
            self.column_ref(&node.alias, &id_field.column),
            self.dialect.quote(&column_label(&node.alias, &id_field.column)),
            self.node_table(node),
            node.alias,
            self.column_ref(&node.alias, fk),
            params.bind(parent_id.clone())
        );
        Ok(Statement::new(sql, params.into_values()))
    }

    /// Delete every row of a scalar collection (`@path`) owned by `parent_id`
    pub fn build_delete_collection(
        &self,
        mapping: &Mapping,
        collection_path: &str,
        parent_id: &Value,
    ) -> Result<Statement, MapperError> {
        let node = mapping.table(collection_path)?;
        let parent = self.field_node(mapping, collection_path, PARENT_FIELD)?;
        let mut params = Params::new(self.dialect);
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            self.node_table(node),
            self.dialect.quote(&parent.column),
            params.bind(parent_id.clone())
        );
        let mut statement = Statement::new(sql, params.into_values());
        statement.delete_target = Some(node.table.clone());
        Ok(statement)
    }

    /// Multi-row insert of scalar collection values; `None` when `rows` is empty
    pub fn build_insert_collection_rows(
        &self,
        mapping: &Mapping,
        collection_path: &str,
        parent_id: &Value,
        rows: &[CollectionRow],
    ) -> Result<Option<Statement>, MapperError> {
        if rows.is_empty() {
            return Ok(None);
        }
        let node = mapping.table(collection_path)?;
        let parent = self.field_node(mapping, collection_path, PARENT_FIELD)?;
        let value = self.field_node(mapping, collection_path, VALUE_FIELD)?;
        let key = mapping.field(collection_path, KEY_FIELD);
        let sort = mapping.field(collection_path, SORT_FIELD);

        let mut names = vec![self.dialect.quote(&parent.column), self.dialect.quote(&value.column)];
        names.extend(key.map(|k| self.dialect.quote(&k.column)));
        names.extend(sort.map(|s| self.dialect.quote(&s.column)));

        let mut params = Params::new(self.dialect);
        let mut tuples = Vec::with_capacity(rows.len());
        for (position, row) in rows.iter().enumerate() {
            let mut items = vec![
                params.bind(parent_id.clone()),
                params.bind(self.encode_field(value, &row.value)?),
            ];
            if let Some(key) = key {
                let raw = row.key.clone().unwrap_or(Value::Null);
                items.push(params.bind(self.encode_field(key, &raw)?));
            }
            if sort.is_some() {
                items.push(params.bind(Value::from(row.index.unwrap_or(position))));
            }
            tuples.push(format!("({})", items.join(", ")));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.node_table(node),
            names.join(", "),
            tuples.join(", ")
        );
        Ok(Some(Statement::new(sql, params.into_values())))
    }

    /// UPDATE root rows selected through the full join graph and filter
    pub fn build_mass_update(
        &self,
        mapping: &Mapping,
        update: &UpdateSet,
        filter: Option<&QueryFilter>,
    ) -> Result<Statement, MapperError> {
        if update.is_empty() {
            return Err(MapperError::configuration("Mass update without operations"));
        }
        let root = mapping.root()?;
        let root_id = self.id_node(mapping, "")?;
        let mut params = Params::new(self.dialect);

        let mut sets = Vec::with_capacity(update.len());
        for (name, operation) in &update.operations {
            let field = self.field_node(mapping, "", name)?;
            let value = match operation {
                UpdateOperation::Set(value) => self.encode_field(field, value)?,
                other => other.value().clone(),
            };
            let placeholder = params.bind(value);
            sets.push(operation.to_sql(&self.dialect.quote(&field.column), &placeholder));
        }

        let mut subquery = format!(
            "SELECT {} FROM {}",
            self.column_ref(&root_id.alias, &root_id.column),
            self.render_from(mapping, JoinType::Left)?
        );
        if let Some(filter) = filter {
            subquery.push_str(" WHERE ");
            subquery.push_str(&self.render_filter(mapping, filter, &mut params)?);
        }

        // MySQL rejects a subquery reading the table being updated unless it is
        // materialized as a derived table first
        if matches!(self.dialect.kind(), DialectKind::Mysql) {
            subquery = format!(
                "SELECT {} FROM ({}) ids",
                self.column_ref("ids", &root_id.column),
                subquery
            );
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {} IN ({})",
            self.node_table(root),
            sets.join(", "),
            self.dialect.quote(&root_id.column),
            subquery
        );
        crate::debug_log!("Built mass UPDATE: {}", sql);
        Ok(Statement::new(sql, params.into_values()))
    }

    /// Join table node and its (owner column, target column) of the many-to-many at `path`
    fn link_columns<'m>(
        &self,
        mapping: &'m Mapping,
        path: &str,
    ) -> Result<(&'m crate::mapping::TableNode, String, String), MapperError> {
        let link = mapping.table(&format!(".{}", path))?;
        let target = mapping.table(path)?;
        match (&link.column, &target.join_column) {
            (Some(owner), Some(inverse)) => Ok((link, owner.clone(), inverse.clone())),
            _ => Err(MapperError::UnknownPath(path.to_string())),
        }
    }

    pub fn build_many_to_many_insert(
        &self,
        mapping: &Mapping,
        path: &str,
        owner_id: &Value,
        target_id: &Value,
        extras: &[(String, Value)],
    ) -> Result<Statement, MapperError> {
        let (link, owner_column, target_column) = self.link_columns(mapping, path)?;
        let mut columns = vec![
            (owner_column, owner_id.clone()),
            (target_column, target_id.clone()),
        ];
        for (column, value) in extras {
            upsert(&mut columns, column, value.clone());
        }

        let mut params = Params::new(self.dialect);
        let names: Vec<String> = columns.iter().map(|(c, _)| self.dialect.quote(c)).collect();
        let values: Vec<String> = columns.into_iter().map(|(_, v)| params.bind(v)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.node_table(link),
            names.join(", "),
            values.join(", ")
        );
        Ok(Statement::new(sql, params.into_values()))
    }

    /// Linked target ids of `owner_id`, optionally probing for one `target_id`
    pub fn build_many_to_many_select(
        &self,
        mapping: &Mapping,
        path: &str,
        owner_id: &Value,
        target_id: Option<&Value>,
    ) -> Result<Statement, MapperError> {
        let (link, owner_column, target_column) = self.link_columns(mapping, path)?;
        let mut params = Params::new(self.dialect);
        let mut sql = format!(
            "SELECT {} AS {} FROM {} {} WHERE {} = {}",
            self.column_ref(&link.alias, &target_column),
            self.dialect.quote(&column_label(&link.alias, &target_column)),
            self.node_table(link),
            link.alias,
            self.column_ref(&link.alias, &owner_column),
            params.bind(owner_id.clone())
        );
        if let Some(target_id) = target_id {
            sql.push_str(&format!(
                " AND {} = {}",
                self.column_ref(&link.alias, &target_column),
                params.bind(target_id.clone())
            ));
        }
        Ok(Statement::new(sql, params.into_values()))
    }

    /// Delete links of `owner_id` except those to `keep`
    pub fn build_many_to_many_delete(
        &self,
        mapping: &Mapping,
        path: &str,
        owner_id: &Value,
        keep: &[Value],
    ) -> Result<Statement, MapperError> {
        let (link, owner_column, target_column) = self.link_columns(mapping, path)?;
        let mut params = Params::new(self.dialect);
        let mut sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            self.node_table(link),
            self.dialect.quote(&owner_column),
            params.bind(owner_id.clone())
        );
        if !keep.is_empty() {
            let placeholders: Vec<String> = keep.iter().map(|v| params.bind(v.clone())).collect();
            sql.push_str(&format!(
                " AND {} NOT IN ({})",
                self.dialect.quote(&target_column),
                placeholders.join(", ")
            ));
        }
        let mut statement = Statement::new(sql, params.into_values());
        statement.delete_target = Some(link.table.clone());
        Ok(statement)
    }

    /// Point (or clear, when `owner_id` is `None`) the target-held FK of the node at `path`
    pub fn build_update_external_fk(
        &self,
        mapping: &Mapping,
        path: &str,
        target_id: &Value,
        owner_id: Option<&Value>,
    ) -> Result<Statement, MapperError> {
        let node = mapping.table(path)?;
        let id_field = self.id_node(mapping, path)?;
        let fk = node
            .column
            .as_deref()
            .ok_or_else(|| MapperError::UnknownPath(path.to_string()))?;
        let mut params = Params::new(self.dialect);
        let sql = format!(
            "UPDATE {} SET {} = {} WHERE {} = {}",
            self.node_table(node),
            self.dialect.quote(fk),
            params.bind(owner_id.cloned().unwrap_or(Value::Null)),
            self.dialect.quote(&id_field.column),
            params.bind(target_id.clone())
        );
        Ok(Statement::new(sql, params.into_values()))
    }

    /// Set the locally held FK `field` of the entity at `path`
    pub fn build_update_internal_fk(
        &self,
        mapping: &Mapping,
        path: &str,
        field: &str,
        entity_id: &Value,
        target_id: &Value,
    ) -> Result<Statement, MapperError> {
        let node = mapping.table(path)?;
        let id_field = self.id_node(mapping, path)?;
        let fk = self.field_node(mapping, path, field)?;
        let mut params = Params::new(self.dialect);
        let sql = format!(
            "UPDATE {} SET {} = {} WHERE {} = {}",
            self.node_table(node),
            self.dialect.quote(&fk.column),
            params.bind(target_id.clone()),
            self.dialect.quote(&id_field.column),
            params.bind(entity_id.clone())
        );
        Ok(Statement::new(sql, params.into_values()))
    }
}
