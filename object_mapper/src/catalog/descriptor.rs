//! Per-entity schema descriptors
//!
//! Descriptors are built once at startup through [`EntityDescriptor::builder`]
//! and are read-only afterwards.

use crate::errors::MapperError;
use crate::validation::{validate_attribute, validate_identifier};

/// Relationship kind declared on a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Reference that is never validated nor cascaded
    WeakAssociation,
    /// Reference to the owning parent; at most one may be set per instance
    ParentAssociation,
    /// Reference to an entity persisted within the same graph
    InnerAssociation,
    /// Reference to an independently persisted entity
    Association,
    /// Parent-owned children, cascade-deleted
    Composition,
    /// Self-referential composition of unbounded depth
    CompositionTree,
    /// Association through a join table
    ManyToMany,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::WeakAssociation => "WEAK_ASSOCIATION",
            RelationKind::ParentAssociation => "PARENT_ASSOCIATION",
            RelationKind::InnerAssociation => "INNER_ASSOCIATION",
            RelationKind::Association => "ASSOCIATION",
            RelationKind::Composition => "COMPOSITION",
            RelationKind::CompositionTree => "COMPOSITION_TREE",
            RelationKind::ManyToMany => "MANY_TO_MANY",
        }
    }

    /// Children whose lifecycle is bound to the declaring entity
    pub fn is_composition(&self) -> bool {
        matches!(self, RelationKind::Composition | RelationKind::CompositionTree)
    }
}

/// Shape of the value held by a relationship or scalar-collection field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    List,
    Set,
    Map,
}

impl Cardinality {
    pub fn is_many(&self) -> bool {
        !matches!(self, Cardinality::One)
    }
}

/// How an entity obtains its id on insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// Database-generated, captured through insert-returning
    Generated,
    /// Random v4 UUID assigned by the persister
    Uuid,
    /// Caller must set the id before persisting
    Assigned,
}

/// Relationship declaration of one field
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDescriptor {
    pub kind: RelationKind,
    pub target: String,
    pub cardinality: Cardinality,
    /// FK column in the declaring entity's table
    pub owner_column: Option<String>,
    /// FK column in the target's table pointing back at the declaring entity
    pub counterpart_column: Option<String>,
    pub join_table: Option<String>,
    /// Join-table column referencing the declaring entity
    pub join_column: Option<String>,
    /// Join-table column referencing the target
    pub inverse_join_column: Option<String>,
    pub sort_column: Option<String>,
    pub map_key_column: Option<String>,
    pub map_key_converter: Option<String>,
    pub required: bool,
}

impl RelationDescriptor {
    fn base(kind: RelationKind, target: &str, cardinality: Cardinality) -> Self {
        Self {
            kind,
            target: target.to_string(),
            cardinality,
            owner_column: None,
            counterpart_column: None,
            join_table: None,
            join_column: None,
            inverse_join_column: None,
            sort_column: None,
            map_key_column: None,
            map_key_converter: None,
            required: false,
        }
    }

    /// Reference to the owning parent, FK held locally
    pub fn parent(target: &str, owner_column: &str) -> Self {
        let mut rel = Self::base(RelationKind::ParentAssociation, target, Cardinality::One);
        rel.owner_column = Some(owner_column.to_string());
        rel
    }

    /// Association whose FK lives in the declaring table
    pub fn association(target: &str, owner_column: &str) -> Self {
        let mut rel = Self::base(RelationKind::Association, target, Cardinality::One);
        rel.owner_column = Some(owner_column.to_string());
        rel
    }

    /// Association whose FK lives in the target table (externally held FK)
    pub fn external_association(target: &str, counterpart_column: &str, cardinality: Cardinality) -> Self {
        let mut rel = Self::base(RelationKind::Association, target, cardinality);
        rel.counterpart_column = Some(counterpart_column.to_string());
        rel
    }

    /// Reference to an entity written in the same persist call
    pub fn inner(target: &str, owner_column: &str) -> Self {
        let mut rel = Self::base(RelationKind::InnerAssociation, target, Cardinality::One);
        rel.owner_column = Some(owner_column.to_string());
        rel
    }

    pub fn weak(target: &str, owner_column: &str) -> Self {
        let mut rel = Self::base(RelationKind::WeakAssociation, target, Cardinality::One);
        rel.owner_column = Some(owner_column.to_string());
        rel
    }

    /// Owned children; `counterpart_column` is the child's FK to the parent id
    pub fn composition(target: &str, counterpart_column: &str, cardinality: Cardinality) -> Self {
        let mut rel = Self::base(RelationKind::Composition, target, cardinality);
        rel.counterpart_column = Some(counterpart_column.to_string());
        rel
    }

    pub fn composition_tree(target: &str, counterpart_column: &str, cardinality: Cardinality) -> Self {
        let mut rel = Self::base(RelationKind::CompositionTree, target, cardinality);
        rel.counterpart_column = Some(counterpart_column.to_string());
        rel
    }

    pub fn many_to_many(
        target: &str,
        join_table: &str,
        join_column: &str,
        inverse_join_column: &str,
        cardinality: Cardinality,
    ) -> Self {
        let mut rel = Self::base(RelationKind::ManyToMany, target, cardinality);
        rel.join_table = Some(join_table.to_string());
        rel.join_column = Some(join_column.to_string());
        rel.inverse_join_column = Some(inverse_join_column.to_string());
        rel
    }

    /// Order-preserving list backed by an index column in the child table
    pub fn sorted_by(mut self, column: &str) -> Self {
        self.sort_column = Some(column.to_string());
        self
    }

    /// Map keyed by a column of the child table
    pub fn keyed_by(mut self, column: &str) -> Self {
        self.map_key_column = Some(column.to_string());
        self
    }

    pub fn key_converter(mut self, converter: &str) -> Self {
        self.map_key_converter = Some(converter.to_string());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Scalar values stored in an auxiliary table keyed by the owner's id
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarCollection {
    pub table: String,
    pub value_column: String,
    pub parent_column: String,
    pub key_column: Option<String>,
    pub sort_column: Option<String>,
    pub cardinality: Cardinality,
}

impl ScalarCollection {
    pub fn new(table: &str, parent_column: &str, value_column: &str, cardinality: Cardinality) -> Self {
        Self {
            table: table.to_string(),
            value_column: value_column.to_string(),
            parent_column: parent_column.to_string(),
            key_column: None,
            sort_column: None,
            cardinality,
        }
    }

    pub fn sorted_by(mut self, column: &str) -> Self {
        self.sort_column = Some(column.to_string());
        self
    }

    pub fn keyed_by(mut self, column: &str) -> Self {
        self.key_column = Some(column.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Scalar { column: String },
    Relation(RelationDescriptor),
    Collection(ScalarCollection),
}

/// One declared field of an entity
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub converter: Option<String>,
    pub encryption_key: Option<String>,
}

impl FieldDescriptor {
    pub fn relation(&self) -> Option<&RelationDescriptor> {
        match &self.kind {
            FieldKind::Relation(rel) => Some(rel),
            _ => None,
        }
    }

    pub fn collection(&self) -> Option<&ScalarCollection> {
        match &self.kind {
            FieldKind::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    pub fn column(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Scalar { column } => Some(column),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, FieldKind::Scalar { .. })
    }
}

/// Table mapping of one entity type
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub id_field: String,
    pub id_column: String,
    pub id_strategy: IdStrategy,
    pub fields: Vec<FieldDescriptor>,
}

impl EntityDescriptor {
    pub fn builder(name: &str) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder::new(name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn scalar_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_scalar())
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = (&FieldDescriptor, &RelationDescriptor)> {
        self.fields
            .iter()
            .filter_map(|f| f.relation().map(|rel| (f, rel)))
    }

    pub fn collection_fields(&self) -> impl Iterator<Item = (&FieldDescriptor, &ScalarCollection)> {
        self.fields
            .iter()
            .filter_map(|f| f.collection().map(|c| (f, c)))
    }
}

/// Fluent builder for [`EntityDescriptor`]
#[derive(Debug, Clone)]
pub struct EntityDescriptorBuilder {
    name: String,
    schema: Option<String>,
    table: Option<String>,
    id_field: String,
    id_column: String,
    id_strategy: IdStrategy,
    fields: Vec<FieldDescriptor>,
}

impl EntityDescriptorBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            schema: None,
            table: None,
            id_field: "id".to_string(),
            id_column: "id".to_string(),
            id_strategy: IdStrategy::Generated,
            fields: Vec::new(),
        }
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn id(mut self, field: &str, column: &str, strategy: IdStrategy) -> Self {
        self.id_field = field.to_string();
        self.id_column = column.to_string();
        self.id_strategy = strategy;
        self
    }

    pub fn scalar(self, field: &str, column: &str) -> Self {
        self.push(field, FieldKind::Scalar { column: column.to_string() }, None, None)
    }

    /// Scalar passed through a registered value converter
    pub fn converted(self, field: &str, column: &str, converter: &str) -> Self {
        self.push(
            field,
            FieldKind::Scalar { column: column.to_string() },
            Some(converter.to_string()),
            None,
        )
    }

    /// Text scalar stored encrypted with `key`
    pub fn encrypted(self, field: &str, column: &str, key: &str) -> Self {
        self.push(
            field,
            FieldKind::Scalar { column: column.to_string() },
            None,
            Some(key.to_string()),
        )
    }

    pub fn relation(self, field: &str, relation: RelationDescriptor) -> Self {
        self.push(field, FieldKind::Relation(relation), None, None)
    }

    pub fn scalar_collection(self, field: &str, collection: ScalarCollection) -> Self {
        self.push(field, FieldKind::Collection(collection), None, None)
    }

    /// Scalar collection whose values pass through a converter
    pub fn converted_collection(self, field: &str, collection: ScalarCollection, converter: &str) -> Self {
        self.push(
            field,
            FieldKind::Collection(collection),
            Some(converter.to_string()),
            None,
        )
    }

    fn push(
        mut self,
        field: &str,
        kind: FieldKind,
        converter: Option<String>,
        encryption_key: Option<String>,
    ) -> Self {
        self.fields.push(FieldDescriptor {
            name: field.to_string(),
            kind,
            converter,
            encryption_key,
        });
        self
    }

    /// Validate identifiers and relationship parameters
    pub fn build(self) -> Result<EntityDescriptor, MapperError> {
        let name = self.name;
        let table = self
            .table
            .ok_or_else(|| MapperError::configuration(format!("Entity '{}' has no table", name)))?;

        let check_table = |value: &str| {
            validate_identifier(value)
                .map_err(|e| MapperError::configuration(format!("Entity '{}': {}", name, e)))
        };
        let check_column = |field: &str, value: &str| {
            validate_identifier(value)
                .map_err(|e| MapperError::configuration(format!("{}.{}: {}", name, field, e)))
        };

        check_table(&table)?;
        if let Some(schema) = &self.schema {
            check_table(schema)?;
        }
        let check_attribute = |field: &str| {
            validate_attribute(field)
                .map_err(|e| MapperError::configuration(format!("Entity '{}' field: {}", name, e)))
        };
        check_attribute(&self.id_field)?;
        check_column(&self.id_field, &self.id_column)?;

        let mut seen = std::collections::HashSet::new();
        seen.insert(self.id_field.clone());
        for field in &self.fields {
            check_attribute(&field.name)?;
            if !seen.insert(field.name.clone()) {
                return Err(MapperError::configuration(format!(
                    "Entity '{}' declares field '{}' twice",
                    name, field.name
                )));
            }
            match &field.kind {
                FieldKind::Scalar { column } => check_column(&field.name, column)?,
                FieldKind::Relation(rel) => {
                    validate_relation(&name, &field.name, rel)?;
                    for column in [
                        &rel.owner_column,
                        &rel.counterpart_column,
                        &rel.join_column,
                        &rel.inverse_join_column,
                        &rel.sort_column,
                        &rel.map_key_column,
                    ]
                    .into_iter()
                    .flatten()
                    {
                        check_column(&field.name, column)?;
                    }
                    if let Some(join_table) = &rel.join_table {
                        check_table(join_table)?;
                    }
                }
                FieldKind::Collection(collection) => {
                    check_table(&collection.table)?;
                    check_column(&field.name, &collection.value_column)?;
                    check_column(&field.name, &collection.parent_column)?;
                    if collection.cardinality == Cardinality::One {
                        return Err(MapperError::configuration(format!(
                            "{}.{}: scalar collections need a List, Set or Map cardinality",
                            name, field.name
                        )));
                    }
                    if collection.cardinality == Cardinality::Map && collection.key_column.is_none() {
                        return Err(MapperError::configuration(format!(
                            "{}.{}: map collections need a key column",
                            name, field.name
                        )));
                    }
                }
            }
            if field.encryption_key.is_some() && !field.is_scalar() {
                return Err(MapperError::configuration(format!(
                    "{}.{}: only scalar fields can be encrypted",
                    name, field.name
                )));
            }
        }

        Ok(EntityDescriptor {
            name,
            schema: self.schema,
            table,
            id_field: self.id_field,
            id_column: self.id_column,
            id_strategy: self.id_strategy,
            fields: self.fields,
        })
    }
}

fn validate_relation(entity: &str, field: &str, rel: &RelationDescriptor) -> Result<(), MapperError> {
    let fail = |reason: &str| {
        Err(MapperError::configuration(format!(
            "{}.{} ({}): {}",
            entity,
            field,
            rel.kind.as_str(),
            reason
        )))
    };

    match rel.kind {
        RelationKind::ManyToMany => {
            if rel.join_table.is_none() || rel.join_column.is_none() || rel.inverse_join_column.is_none() {
                return fail("join table and both join columns are required");
            }
        }
        RelationKind::Composition | RelationKind::CompositionTree => {
            if rel.counterpart_column.is_none() {
                return fail("the child FK column is required");
            }
        }
        RelationKind::ParentAssociation
        | RelationKind::InnerAssociation
        | RelationKind::WeakAssociation
        | RelationKind::Association => {
            if rel.owner_column.is_none() && rel.counterpart_column.is_none() {
                return fail("either a local or a counterpart FK column is required");
            }
            if rel.cardinality.is_many() && rel.owner_column.is_some() {
                return fail("a local FK column can only hold a single reference");
            }
        }
    }
    if rel.cardinality == Cardinality::Map && rel.map_key_column.is_none() {
        return fail("map relations need a key column");
    }
    if rel.kind == RelationKind::CompositionTree && rel.target.is_empty() {
        return fail("tree target is required");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_order_descriptor() {
        let order = EntityDescriptor::builder("Order")
            .table("orders")
            .scalar("number", "number")
            .relation(
                "items",
                RelationDescriptor::composition("OrderItem", "order_id", Cardinality::List).sorted_by("pos"),
            )
            .build()
            .unwrap();

        assert_eq!(order.table, "orders");
        assert_eq!(order.id_column, "id");
        assert_eq!(order.scalar_fields().count(), 1);
        let (_, items) = order.relation_fields().next().unwrap();
        assert_eq!(items.sort_column.as_deref(), Some("pos"));
    }

    #[test]
    fn test_missing_table_rejected() {
        let err = EntityDescriptor::builder("Order").build().unwrap_err();
        assert!(err.to_string().contains("has no table"));
    }

    #[test]
    fn test_invalid_column_rejected() {
        let err = EntityDescriptor::builder("Order")
            .table("orders")
            .scalar("number", "order number")
            .build()
            .unwrap_err();
        assert!(matches!(err, MapperError::Configuration(_)));
    }

    #[test]
    fn test_reserved_words_are_legal_names() {
        let note = EntityDescriptor::builder("Note")
            .table("order")
            .scalar("select", "select")
            .relation("order", RelationDescriptor::parent("Order", "order_id"))
            .build();
        assert!(note.is_ok());
    }

    #[test]
    fn test_path_syntax_in_field_name_rejected() {
        let err = EntityDescriptor::builder("Order")
            .table("orders")
            .scalar("items.qty", "qty")
            .build()
            .unwrap_err();
        assert!(matches!(err, MapperError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = EntityDescriptor::builder("Order")
            .table("orders")
            .scalar("number", "number")
            .scalar("number", "number2")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn test_many_to_many_requires_join_columns() {
        let mut rel = RelationDescriptor::many_to_many("Tag", "order_tags", "order_id", "tag_id", Cardinality::Set);
        rel.inverse_join_column = None;
        let err = EntityDescriptor::builder("Order")
            .table("orders")
            .relation("tags", rel)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("MANY_TO_MANY"));
    }

    #[test]
    fn test_map_collection_requires_key() {
        let err = EntityDescriptor::builder("Order")
            .table("orders")
            .scalar_collection(
                "attributes",
                ScalarCollection::new("order_attributes", "order_id", "value", Cardinality::Map),
            )
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("key column"));
    }

    #[test]
    fn test_encrypted_flag_only_on_scalars() {
        let descriptor = EntityDescriptor::builder("Customer")
            .table("customers")
            .encrypted("tax_number", "tax_number", "k1")
            .build()
            .unwrap();
        assert_eq!(
            descriptor.field("tax_number").unwrap().encryption_key.as_deref(),
            Some("k1")
        );
    }
}
