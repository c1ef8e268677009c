//! Shared fixtures for unit tests: a sample schema and a recording connection source

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::catalog::{
    Cardinality, EntityDescriptor, Encryptor, RelationDescriptor, ScalarCollection, SchemaCatalog,
};
use crate::connection::{ConnectionSource, SqlRow};
use crate::errors::MapperError;
use crate::query_builder::Statement;

/// Prefixes the key and reverses the text
#[derive(Debug)]
pub(crate) struct Reverse;

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

pub(crate) fn sample_catalog() -> SchemaCatalog {
    let customer = EntityDescriptor::builder("Customer")
        .table("customers")
        .scalar("name", "name")
        .encrypted("tax_number", "tax_number", "k1")
        .build()
        .unwrap();
    let order = EntityDescriptor::builder("Order")
        .table("orders")
        .scalar("number", "number")
        .scalar("status", "status")
        .converted("active", "active", "bool_as_int")
        .relation("customer", RelationDescriptor::association("Customer", "customer_id"))
        .relation(
            "items",
            RelationDescriptor::composition("OrderItem", "order_id", Cardinality::List).sorted_by("pos"),
        )
        .relation(
            "tags",
            RelationDescriptor::many_to_many("Tag", "order_tags", "order_id", "tag_id", Cardinality::Set),
        )
        .scalar_collection(
            "labels",
            ScalarCollection::new("order_labels", "order_id", "label", Cardinality::List).sorted_by("pos"),
        )
        .scalar_collection(
            "attributes",
            ScalarCollection::new("order_attributes", "order_id", "value", Cardinality::Map).keyed_by("name"),
        )
        .build()
        .unwrap();
    let item = EntityDescriptor::builder("OrderItem")
        .table("order_items")
        .scalar("product", "product")
        .scalar("qty", "qty")
        .build()
        .unwrap();
    let tag = EntityDescriptor::builder("Tag")
        .table("tags")
        .scalar("name", "name")
        .build()
        .unwrap();
    let note = EntityDescriptor::builder("Note")
        .table("notes")
        .scalar("text", "text")
        .relation("order", RelationDescriptor::parent("Order", "order_id"))
        .relation("customer", RelationDescriptor::parent("Customer", "customer_id"))
        .build()
        .unwrap();
    let category = EntityDescriptor::builder("Category")
        .table("categories")
        .scalar("name", "name")
        .relation(
            "children",
            RelationDescriptor::composition_tree("Category", "parent_id", Cardinality::List).sorted_by("pos"),
        )
        .build()
        .unwrap();
    let person = EntityDescriptor::builder("Person")
        .table("people")
        .scalar("name", "name")
        .relation("partner", RelationDescriptor::inner("Person", "partner_id"))
        .relation("favourite_item", RelationDescriptor::inner("OrderItem", "favourite_item_id"))
        .relation("referrer", RelationDescriptor::weak("Person", "referrer_id"))
        .build()
        .unwrap();

    SchemaCatalog::builder()
        .with_builtin_converters()
        .encryptor(Arc::new(Reverse))
        .entity(customer)
        .entity(order)
        .entity(item)
        .entity(tag)
        .entity(note)
        .entity(category)
        .entity(person)
        .build()
        .unwrap()
}

/// Records every statement; inserts return increasing ids starting at 100,
/// fetches return queued rows for the first matching SQL fragment.
#[derive(Debug)]
pub(crate) struct RecordingSource {
    statements: Mutex<Vec<Statement>>,
    responses: Mutex<Vec<(String, Vec<SqlRow>)>>,
    next_id: AtomicI64,
}

impl RecordingSource {
    pub(crate) fn new() -> Self {
        Self {
            statements: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(100),
        }
    }

    /// Queue `rows` for the next fetch whose SQL contains `fragment`
    pub(crate) fn respond(&self, fragment: &str, rows: Vec<SqlRow>) {
        self.responses
            .lock()
            .unwrap()
            .push((fragment.to_string(), rows));
    }

    pub(crate) fn statements(&self) -> Vec<Statement> {
        self.statements.lock().unwrap().clone()
    }

    pub(crate) fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|s| s.sql).collect()
    }

    /// Recorded statements whose SQL starts with `prefix`
    pub(crate) fn matching(&self, prefix: &str) -> Vec<Statement> {
        self.statements()
            .into_iter()
            .filter(|s| s.sql.starts_with(prefix))
            .collect()
    }

    fn record(&self, statement: &Statement) {
        self.statements.lock().unwrap().push(statement.clone());
    }
}

#[async_trait]
impl ConnectionSource for RecordingSource {
    async fn fetch(&self, statement: &Statement) -> Result<Vec<SqlRow>, MapperError> {
        self.record(statement);
        let mut responses = self.responses.lock().unwrap();
        match responses
            .iter()
            .position(|(fragment, _)| statement.sql.contains(fragment.as_str()))
        {
            Some(index) => Ok(responses.remove(index).1),
            None => Ok(Vec::new()),
        }
    }

    async fn execute(&self, statement: &Statement) -> Result<u64, MapperError> {
        self.record(statement);
        Ok(1)
    }

    async fn insert(&self, statement: &Statement) -> Result<Option<Value>, MapperError> {
        self.record(statement);
        Ok(statement
            .returning
            .as_ref()
            .map(|_| json!(self.next_id.fetch_add(1, Ordering::SeqCst))))
    }
}
