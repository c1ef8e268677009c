//! Mapping graph
//!
//! A [`Mapping`] binds dotted attribute paths of an entity graph to table
//! aliases and columns. Table nodes are keyed by path and by alias; field
//! nodes by `(path, field)`.
//!
//! Path conventions:
//! - `""` is the root entity table
//! - `"items"`, `"items.product"` are entity tables reached through relationships
//! - `".tags"` is the join table of the many-to-many relationship `tags`
//! - `"@labels"` is the auxiliary table of the scalar collection `labels`

mod builder;

use crate::catalog::RelationKind;
use crate::errors::MapperError;

/// Pseudo field bound to a relationship's sort column
pub const SORT_FIELD: &str = "#sort";
/// Pseudo field bound to a map key column
pub const KEY_FIELD: &str = "#key";
/// Pseudo field bound to a scalar collection's value column
pub const VALUE_FIELD: &str = "#value";
/// Pseudo field bound to a scalar collection's owner FK
pub const PARENT_FIELD: &str = "#parent";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Entity,
    JoinTable,
    Collection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableNode {
    /// Entity type for entity nodes, `None` for join and collection tables
    pub entity: Option<String>,
    pub path: String,
    pub schema: Option<String>,
    pub table: String,
    pub alias: String,
    /// Alias of the table this node is joined onto
    pub join_alias: Option<String>,
    /// Column of this table in the join predicate
    pub column: Option<String>,
    /// Column of the joined-onto table in the join predicate
    pub join_column: Option<String>,
    pub id_column: Option<String>,
    /// Relationship through which the node was reached
    pub relation: Option<RelationKind>,
    /// Declaring field name on the owning entity
    pub field: Option<String>,
}

impl TableNode {
    pub fn kind(&self) -> NodeKind {
        if self.path.starts_with('.') {
            NodeKind::JoinTable
        } else if self.path.starts_with('@') {
            NodeKind::Collection
        } else if self.path.is_empty() {
            NodeKind::Root
        } else {
            NodeKind::Entity
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Id,
    Scalar,
    /// Locally held FK of a single-valued relationship
    ForeignKey,
    Sort,
    MapKey,
    Value,
    Parent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    pub path: String,
    pub field: String,
    pub alias: String,
    pub column: String,
    pub role: FieldRole,
    pub converter: Option<String>,
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Mapping {
    root_entity: String,
    tables: Vec<TableNode>,
    fields: Vec<FieldNode>,
    next_alias: usize,
}

impl Mapping {
    pub fn root_entity(&self) -> &str {
        &self.root_entity
    }

    pub fn root(&self) -> Result<&TableNode, MapperError> {
        self.table("")
    }

    pub fn tables(&self) -> &[TableNode] {
        &self.tables
    }

    pub fn fields(&self) -> &[FieldNode] {
        &self.fields
    }

    pub fn table(&self, path: &str) -> Result<&TableNode, MapperError> {
        self.find_table(path)
            .ok_or_else(|| MapperError::UnknownPath(path.to_string()))
    }

    pub fn find_table(&self, path: &str) -> Option<&TableNode> {
        self.tables.iter().find(|t| t.path == path)
    }

    pub fn table_by_alias(&self, alias: &str) -> Option<&TableNode> {
        self.tables.iter().find(|t| t.alias == alias)
    }

    pub fn field(&self, path: &str, field: &str) -> Option<&FieldNode> {
        self.fields
            .iter()
            .find(|f| f.path == path && f.field == field)
    }

    pub fn fields_of<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a FieldNode> + 'a {
        self.fields.iter().filter(move |f| f.path == path)
    }

    /// Nodes joined directly onto `alias`
    pub fn children_of<'a>(&'a self, alias: &'a str) -> impl Iterator<Item = &'a TableNode> + 'a {
        self.tables
            .iter()
            .filter(move |t| t.join_alias.as_deref() == Some(alias))
    }

    /// Resolve a dotted attribute path (`"items.qty"`, `"id"`) to its field node
    pub fn resolve_attribute(&self, path: &str) -> Result<&FieldNode, MapperError> {
        let (owner, field) = split_path(path);
        let owner_node = self
            .find_table(owner)
            .ok_or_else(|| MapperError::UnknownPath(path.to_string()))?;
        self.field(&owner_node.path, field)
            .ok_or_else(|| MapperError::UnknownPath(path.to_string()))
    }

    /// Id field node of an entity table
    pub fn id_field(&self, path: &str) -> Option<&FieldNode> {
        self.fields
            .iter()
            .find(|f| f.path == path && f.role == FieldRole::Id)
    }

    /// Entity node owning `node` in the object graph (skips join tables)
    pub fn owner_of(&self, node: &TableNode) -> Option<&TableNode> {
        let parent = self.table_by_alias(node.join_alias.as_deref()?)?;
        match parent.kind() {
            NodeKind::JoinTable => self.owner_of(parent),
            _ => Some(parent),
        }
    }

    /// Sort or key pseudo field of the relationship reaching `path`
    pub fn relation_field(&self, path: &str, pseudo: &str) -> Option<&FieldNode> {
        self.field(path, pseudo)
            .or_else(|| self.field(&format!(".{}", path), pseudo))
    }

    fn register_table(&mut self, node: TableNode) -> Result<(), MapperError> {
        if self.tables.iter().any(|t| t.alias == node.alias) {
            return Err(MapperError::DuplicateAlias(node.alias));
        }
        if self.tables.iter().any(|t| t.path == node.path) {
            return Err(MapperError::DuplicatePath(node.path));
        }
        crate::trace_log!("Registered table node '{}' as {}", node.path, node.alias);
        self.tables.push(node);
        Ok(())
    }

    fn register_field(&mut self, node: FieldNode) -> Result<(), MapperError> {
        if self.field(&node.path, &node.field).is_some() {
            return Err(MapperError::DuplicatePath(format!("{}#{}", node.path, node.field)));
        }
        self.fields.push(node);
        Ok(())
    }

    fn allocate_alias(&mut self) -> String {
        let alias = format!("t{}", self.next_alias);
        self.next_alias += 1;
        alias
    }
}

/// Split `"a.b.c"` into `("a.b", "c")`; a single segment has the root as owner
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('.') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Join an owner path and a field name
pub fn join_path(owner: &str, field: &str) -> String {
    if owner.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", owner, field)
    }
}

#[cfg(test)]
mod tests;
