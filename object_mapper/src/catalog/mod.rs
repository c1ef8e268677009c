//! Schema catalog
//!
//! Read-only registry of entity descriptors, converters and the optional
//! resolver and encryptor. Built once through [`SchemaCatalog::builder`] and
//! shared behind an `Arc` by every store.

pub mod converter;
pub mod descriptor;
pub mod encryption;
pub mod resolver;

pub use converter::{BoolAsInt, JsonText, ValueConverter};
pub use descriptor::{
    Cardinality, EntityDescriptor, EntityDescriptorBuilder, FieldDescriptor, FieldKind, IdStrategy,
    RelationDescriptor, RelationKind, ScalarCollection,
};
pub use encryption::Encryptor;
pub use resolver::{Resolver, TableName};

use config::MappingConfig;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::entity::Entity;
use crate::errors::MapperError;

#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    entities: HashMap<String, EntityDescriptor>,
    converters: HashMap<String, Arc<dyn ValueConverter>>,
    encryptor: Option<Arc<dyn Encryptor>>,
    resolver: Option<Arc<dyn Resolver>>,
    default_schema: Option<String>,
}

impl SchemaCatalog {
    pub fn builder() -> SchemaCatalogBuilder {
        SchemaCatalogBuilder::default()
    }

    pub fn entity(&self, name: &str) -> Result<&EntityDescriptor, MapperError> {
        self.entities
            .get(name)
            .ok_or_else(|| MapperError::configuration(format!("Unknown entity type '{}'", name)))
    }

    pub fn field(&self, entity: &str, field: &str) -> Result<&FieldDescriptor, MapperError> {
        self.entity(entity)?.field(field).ok_or_else(|| {
            MapperError::configuration(format!("Entity '{}' has no field '{}'", entity, field))
        })
    }

    /// Concrete type for a declared relationship target
    pub fn resolve_entity_type(&self, declared: &str) -> String {
        self.resolver
            .as_ref()
            .and_then(|r| r.resolve_entity_type(declared))
            .unwrap_or_else(|| declared.to_string())
    }

    /// Resolver override, then default schema, then the declared binding
    pub fn table_for(&self, entity: &EntityDescriptor) -> TableName {
        if let Some(name) = self.resolver.as_ref().and_then(|r| r.resolve_table(&entity.name)) {
            return name;
        }
        TableName {
            schema: self
                .default_schema
                .clone()
                .or_else(|| entity.schema.clone()),
            table: entity.table.clone(),
        }
    }

    /// Schema for auxiliary tables (join tables, scalar collections) owned by `entity`
    pub fn schema_for(&self, entity: &EntityDescriptor) -> Option<String> {
        self.table_for(entity).schema
    }

    /// Whether `entity` rows are only ever written beneath a composition parent
    pub fn is_composition_owned(&self, entity: &str) -> bool {
        self.entities
            .values()
            .flat_map(|descriptor| descriptor.relation_fields())
            .any(|(_, rel)| {
                rel.kind == RelationKind::Composition && self.resolve_entity_type(&rel.target) == entity
            })
    }

    pub fn column_for(&self, entity: &EntityDescriptor, field: &FieldDescriptor) -> Option<String> {
        self.resolver
            .as_ref()
            .and_then(|r| r.resolve_column(&entity.name, &field.name))
            .or_else(|| field.column().map(str::to_string))
    }

    pub fn instantiate(&self, entity: &str) -> Entity {
        self.resolver
            .as_ref()
            .and_then(|r| r.instantiate(entity))
            .unwrap_or_else(|| Entity::new(entity))
    }

    pub fn converter(&self, name: &str) -> Result<&Arc<dyn ValueConverter>, MapperError> {
        self.converters
            .get(name)
            .ok_or_else(|| MapperError::configuration(format!("Unknown converter '{}'", name)))
    }

    pub fn has_encryptor(&self) -> bool {
        self.encryptor.is_some()
    }

    /// Object value to stored value: converter first, then encryption
    pub fn encode(
        &self,
        field: &str,
        converter: Option<&str>,
        encryption_key: Option<&str>,
        value: &Value,
    ) -> Result<Value, MapperError> {
        let converted = match converter {
            Some(name) => self.converter(name)?.to_db(value)?,
            None => value.clone(),
        };
        match encryption_key {
            Some(key) => self.encrypt(field, key, converted),
            None => Ok(converted),
        }
    }

    /// Stored value to object value: decryption first, then converter
    pub fn decode(
        &self,
        field: &str,
        converter: Option<&str>,
        encryption_key: Option<&str>,
        value: &Value,
    ) -> Result<Value, MapperError> {
        let plain = match encryption_key {
            Some(key) => self.decrypt(field, key, value)?,
            None => value.clone(),
        };
        match converter {
            Some(name) => self.converter(name)?.to_vo(&plain),
            None => Ok(plain),
        }
    }

    fn encrypt(&self, field: &str, key: &str, value: Value) -> Result<Value, MapperError> {
        let encryptor = self.require_encryptor(field)?;
        match value {
            Value::Null => Ok(Value::Null),
            Value::String(text) => encryptor.encrypt(key, &text).map(Value::String),
            other => Err(MapperError::Encryption {
                field: field.to_string(),
                reason: format!("only text values can be encrypted, got {}", other),
            }),
        }
    }

    fn decrypt(&self, field: &str, key: &str, value: &Value) -> Result<Value, MapperError> {
        let encryptor = self.require_encryptor(field)?;
        match value {
            Value::Null => Ok(Value::Null),
            Value::String(text) => encryptor.decrypt(key, text).map(Value::String),
            other => Err(MapperError::Encryption {
                field: field.to_string(),
                reason: format!("stored value is not text: {}", other),
            }),
        }
    }

    fn require_encryptor(&self, field: &str) -> Result<&Arc<dyn Encryptor>, MapperError> {
        self.encryptor.as_ref().ok_or_else(|| MapperError::Encryption {
            field: field.to_string(),
            reason: "no encryptor registered".to_string(),
        })
    }
}

/// Collects descriptors and hooks, validating cross references on [`build`](Self::build)
#[derive(Debug, Default)]
pub struct SchemaCatalogBuilder {
    entities: Vec<EntityDescriptor>,
    converters: HashMap<String, Arc<dyn ValueConverter>>,
    encryptor: Option<Arc<dyn Encryptor>>,
    resolver: Option<Arc<dyn Resolver>>,
    default_schema: Option<String>,
}

impl SchemaCatalogBuilder {
    pub fn entity(mut self, descriptor: EntityDescriptor) -> Self {
        self.entities.push(descriptor);
        self
    }

    pub fn converter(mut self, converter: Arc<dyn ValueConverter>) -> Self {
        self.converters.insert(converter.name().to_string(), converter);
        self
    }

    /// Register [`BoolAsInt`] and [`JsonText`]
    pub fn with_builtin_converters(self) -> Self {
        self.converter(Arc::new(BoolAsInt)).converter(Arc::new(JsonText))
    }

    pub fn encryptor(mut self, encryptor: Arc<dyn Encryptor>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn default_schema(mut self, schema: Option<String>) -> Self {
        self.default_schema = schema;
        self
    }

    /// Apply the `[mapping]` section of the application config
    pub fn mapping_config(self, config: &MappingConfig) -> Self {
        self.default_schema(config.default_schema.clone())
    }

    pub fn build(self) -> Result<SchemaCatalog, MapperError> {
        let mut entities = HashMap::new();
        for descriptor in self.entities {
            if entities.contains_key(&descriptor.name) {
                return Err(MapperError::configuration(format!(
                    "Entity '{}' registered twice",
                    descriptor.name
                )));
            }
            entities.insert(descriptor.name.clone(), descriptor);
        }

        let catalog = SchemaCatalog {
            entities,
            converters: self.converters,
            encryptor: self.encryptor,
            resolver: self.resolver,
            default_schema: self.default_schema,
        };

        for descriptor in catalog.entities.values() {
            for field in &descriptor.fields {
                if let Some(rel) = field.relation() {
                    let target = catalog.resolve_entity_type(&rel.target);
                    if !catalog.entities.contains_key(&target) {
                        return Err(MapperError::configuration(format!(
                            "{}.{} targets unknown entity '{}'",
                            descriptor.name, field.name, target
                        )));
                    }
                    if let Some(name) = &rel.map_key_converter {
                        catalog.converter(name)?;
                    }
                }
                if let Some(name) = &field.converter {
                    catalog.converter(name)?;
                }
                if field.encryption_key.is_some() && catalog.encryptor.is_none() {
                    return Err(MapperError::configuration(format!(
                        "{}.{} is encrypted but no encryptor is registered",
                        descriptor.name, field.name
                    )));
                }
            }
        }

        crate::debug_log!(
            "Schema catalog built with {} entities and {} converters",
            catalog.entities.len(),
            catalog.converters.len()
        );
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Reverse;

    impl Encryptor for Reverse {
        fn encrypt(&self, key: &str, plain: &str) -> Result<String, MapperError> {
            Ok(format!("{}:{}", key, plain.chars().rev().collect::<String>()))
        }

        fn decrypt(&self, key: &str, cipher: &str) -> Result<String, MapperError> {
            let body = cipher
                .strip_prefix(&format!("{}:", key))
                .ok_or_else(|| MapperError::Encryption {
                    field: String::new(),
                    reason: "wrong key".to_string(),
                })?;
            Ok(body.chars().rev().collect())
        }
    }

    #[derive(Debug)]
    struct Tenant;

    impl Resolver for Tenant {
        fn resolve_table(&self, entity: &str) -> Option<TableName> {
            (entity == "Customer").then(|| TableName::new(Some("tenant_a"), "customers"))
        }

        fn resolve_column(&self, entity: &str, field: &str) -> Option<String> {
            (entity == "Customer" && field == "name").then(|| "full_name".to_string())
        }
    }

    fn customer() -> EntityDescriptor {
        EntityDescriptor::builder("Customer")
            .table("customers")
            .scalar("name", "name")
            .converted("active", "active", "bool_as_int")
            .encrypted("tax_number", "tax_number", "k1")
            .build()
            .unwrap()
    }

    fn order() -> EntityDescriptor {
        EntityDescriptor::builder("Order")
            .schema("sales")
            .table("orders")
            .relation("customer", RelationDescriptor::association("Customer", "customer_id"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_unknown_target_rejected() {
        let err = SchemaCatalog::builder().entity(order()).build().unwrap_err();
        assert!(err.to_string().contains("unknown entity 'Customer'"));
    }

    #[test]
    fn test_encrypted_field_requires_encryptor() {
        let err = SchemaCatalog::builder()
            .with_builtin_converters()
            .entity(customer())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no encryptor"));
    }

    #[test]
    fn test_override_chain() {
        let catalog = SchemaCatalog::builder()
            .with_builtin_converters()
            .encryptor(Arc::new(Reverse))
            .resolver(Arc::new(Tenant))
            .default_schema(Some("public".to_string()))
            .entity(customer())
            .entity(order())
            .build()
            .unwrap();

        let customer = catalog.entity("Customer").unwrap();
        assert_eq!(catalog.table_for(customer), TableName::new(Some("tenant_a"), "customers"));
        let name = customer.field("name").unwrap();
        assert_eq!(catalog.column_for(customer, name).as_deref(), Some("full_name"));

        // the configured default replaces the declared schema
        let order = catalog.entity("Order").unwrap();
        assert_eq!(catalog.table_for(order).schema.as_deref(), Some("public"));
    }

    #[test]
    fn test_declared_schema_applies_without_a_default() {
        let retarget = |default: Option<&str>| {
            let catalog = SchemaCatalog::builder()
                .with_builtin_converters()
                .encryptor(Arc::new(Reverse))
                .default_schema(default.map(str::to_string))
                .entity(customer())
                .entity(order())
                .build()
                .unwrap();
            let order = catalog.entity("Order").unwrap();
            catalog.table_for(order)
        };

        assert_eq!(retarget(None), TableName::new(Some("sales"), "orders"));
        assert_eq!(retarget(Some("tenant_b")), TableName::new(Some("tenant_b"), "orders"));
    }

    #[test]
    fn test_mapping_config_sets_default_schema() {
        let mapping = MappingConfig {
            default_schema: Some("archive".to_string()),
        };
        let catalog = SchemaCatalog::builder()
            .with_builtin_converters()
            .encryptor(Arc::new(Reverse))
            .mapping_config(&mapping)
            .entity(customer())
            .build()
            .unwrap();

        let customer = catalog.entity("Customer").unwrap();
        assert_eq!(catalog.table_for(customer), TableName::new(Some("archive"), "customers"));
    }

    #[test]
    fn test_encode_and_decode() {
        let catalog = SchemaCatalog::builder()
            .with_builtin_converters()
            .encryptor(Arc::new(Reverse))
            .entity(customer())
            .build()
            .unwrap();

        let stored = catalog
            .encode("tax_number", None, Some("k1"), &json!("abc"))
            .unwrap();
        assert_eq!(stored, json!("k1:cba"));
        assert_eq!(
            catalog.decode("tax_number", None, Some("k1"), &stored).unwrap(),
            json!("abc")
        );
        assert_eq!(
            catalog.encode("active", Some("bool_as_int"), None, &json!(true)).unwrap(),
            json!(1)
        );
        assert!(catalog.encode("tax_number", None, Some("k1"), &json!(5)).is_err());
    }
}
