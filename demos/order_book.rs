//! # Order Book Demo
//!
//! Walks through the main RelHaus operations on a small order schema:
//! - Declaring entities, compositions, associations, many-to-many links and scalar collections
//! - Persisting a whole graph in one call
//! - Loading graphs by attribute path, with filters, ordering and pagination
//! - Diffing a loaded graph and writing only the changes back
//! - Counting, aggregating, mass updates and cascading deletes
//!
//! Reads `RELHAUS_CONFIG` (or `./relhaus.toml`) for the connection settings.

use relhaus::prelude::*;
use std::sync::Arc;

/// XOR with the key bytes, hex encoded. Deterministic, so equality filters still match.
#[derive(Debug)]
struct XorHex;

impl Encryptor for XorHex {
    fn encrypt(&self, key: &str, plain: &str) -> Result<String, MapperError> {
        let key = key.as_bytes();
        Ok(plain
            .bytes()
            .enumerate()
            .map(|(i, b)| format!("{:02x}", b ^ key[i % key.len()]))
            .collect())
    }

    fn decrypt(&self, key: &str, cipher: &str) -> Result<String, MapperError> {
        let key = key.as_bytes();
        let bytes = (0..cipher.len())
            .step_by(2)
            .enumerate()
            .map(|(i, start)| {
                u8::from_str_radix(&cipher[start..start + 2], 16)
                    .map(|b| b ^ key[i % key.len()])
                    .map_err(|e| MapperError::Encryption {
                        field: String::new(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<u8>, _>>()?;
        String::from_utf8(bytes).map_err(|e| MapperError::Encryption {
            field: String::new(),
            reason: e.to_string(),
        })
    }
}

fn order_catalog(mapping: &MappingConfig) -> Result<SchemaCatalog, MapperError> {
    let customer = EntityDescriptor::builder("Customer")
        .table("demo_customers")
        .scalar("name", "name")
        .encrypted("tax_number", "tax_number", "demo-key")
        .build()?;
    let order = EntityDescriptor::builder("Order")
        .table("demo_orders")
        .scalar("number", "number")
        .scalar("status", "status")
        .relation("customer", RelationDescriptor::association("Customer", "customer_id"))
        .relation(
            "items",
            RelationDescriptor::composition("OrderItem", "order_id", Cardinality::List).sorted_by("pos"),
        )
        .relation(
            "tags",
            RelationDescriptor::many_to_many("Tag", "demo_order_tags", "order_id", "tag_id", Cardinality::Set),
        )
        .scalar_collection(
            "notes",
            ScalarCollection::new("demo_order_notes", "order_id", "note", Cardinality::List).sorted_by("pos"),
        )
        .build()?;
    let item = EntityDescriptor::builder("OrderItem")
        .table("demo_order_items")
        .scalar("product", "product")
        .scalar("qty", "qty")
        .build()?;
    let tag = EntityDescriptor::builder("Tag")
        .table("demo_tags")
        .scalar("name", "name")
        .build()?;

    SchemaCatalog::builder()
        .entity(customer)
        .entity(order)
        .entity(item)
        .entity(tag)
        .with_builtin_converters()
        .encryptor(Arc::new(XorHex))
        .mapping_config(mapping)
        .build()
}

const SCHEMA: &[&str] = &[
    "DROP TABLE IF EXISTS demo_order_notes, demo_order_tags, demo_order_items, demo_orders, demo_tags, demo_customers",
    "CREATE TABLE demo_customers (id SERIAL PRIMARY KEY, name TEXT NOT NULL, tax_number TEXT)",
    "CREATE TABLE demo_tags (id SERIAL PRIMARY KEY, name TEXT NOT NULL)",
    "CREATE TABLE demo_orders (id SERIAL PRIMARY KEY, number TEXT NOT NULL, status TEXT NOT NULL, \
     customer_id INTEGER REFERENCES demo_customers(id))",
    "CREATE TABLE demo_order_items (id SERIAL PRIMARY KEY, order_id INTEGER REFERENCES demo_orders(id), \
     pos INTEGER, product TEXT NOT NULL, qty INTEGER NOT NULL)",
    "CREATE TABLE demo_order_tags (order_id INTEGER REFERENCES demo_orders(id), tag_id INTEGER REFERENCES demo_tags(id))",
    "CREATE TABLE demo_order_notes (order_id INTEGER REFERENCES demo_orders(id), pos INTEGER, note TEXT)",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🚀 RelHaus Order Book Demo");
    println!("==========================");

    // 1. Setup
    println!("\n📊 Step 1: Connect and create tables");
    let config = AppConfig::load()?;
    let relhaus = RelHaus::new(&config, order_catalog(&config.mapping)?).await?;
    relhaus.health_check().await?;
    for statement in SCHEMA {
        sqlx::query(statement).execute(relhaus.pool()).await?;
    }
    println!("✅ Schema ready");

    let orders = relhaus.store("Order")?;

    // 2. Persist a graph
    println!("\n💾 Step 2: Persist an order graph");
    let mut graph = ObjectGraph::new();
    let ada = graph.add(
        Entity::new("Customer")
            .with("name", "Ada")
            .with("tax_number", "DE-123"),
    );
    let urgent = graph.add(Entity::new("Tag").with("name", "urgent"));
    let mut draft = Entity::new("Order").with("number", "A-1").with("status", "open");
    draft.set(
        "notes",
        FieldValue::ScalarList(vec![json!("call first"), json!("fragile")]),
    );
    let order = graph.add(draft);
    graph.set_reference(order, "customer", Some(ada));
    graph.push_child(order, "tags", urgent);
    for (product, qty) in [("keyboard", 1), ("cable", 3)] {
        let item = graph.add(
            Entity::new("OrderItem")
                .with("product", product)
                .with("qty", qty),
        );
        graph.push_child(order, "items", item);
    }
    orders.persist(&mut graph, order).await?;
    let order_id = graph.get(order).id().cloned().unwrap_or(Value::Null);
    println!("✅ Order stored with id {}", order_id);

    // 3. Read back by attribute path
    println!("\n🔎 Step 3: Load by id");
    let paths = ["number", "status", "customer.name", "customer.tax_number", "items", "tags.name", "notes"];
    if let Some(loaded) = orders.find_by_id(&order_id, &paths).await? {
        println!("{}", serde_json::to_string_pretty(&loaded.to_json())?);
    }

    // 4. Change and write back
    println!("\n✏️  Step 4: Edit a loaded graph");
    let mut loaded = orders
        .find_for_update(&paths, QueryBuilder::new().filter(QueryFilter::eq("id", order_id.clone())))
        .await?;
    if let Some(root) = loaded.root() {
        loaded.graph.set_scalar(root, "status", "shipped");
        let first_item = loaded.graph.get(root).related("items").first().copied();
        if let Some(item) = first_item {
            loaded.graph.remove_child(root, "items", item);
        }
        orders.persist(&mut loaded.graph, root).await?;
        println!("✅ Status updated and one item removed");
    }

    // 5. Queries
    println!("\n📈 Step 5: Count, page and aggregate");
    for number in ["A-2", "A-3", "A-4"] {
        let mut graph = ObjectGraph::new();
        let root = graph.add(Entity::new("Order").with("number", number).with("status", "open"));
        orders.persist(&mut graph, root).await?;
    }
    let open = orders
        .count(QueryBuilder::new().filter(QueryFilter::eq("status", json!("open"))))
        .await?;
    println!("Open orders: {}", open);

    let page = orders
        .find_list(
            &["number"],
            QueryBuilder::new()
                .order_by("number", SortOrder::Desc)
                .paginate(Pagination::new().with_limit(2).with_offset(1)),
        )
        .await?;
    println!("Second page: {}", page.to_json());

    let per_status = orders
        .aggregate(
            QueryBuilder::new()
                .projection(Projection::Expressions(vec![
                    Expression::attr("status"),
                    Expression::count_all(),
                ]))
                .group_by(GroupBy::single("status")),
        )
        .await?;
    for row in per_status {
        println!("  {:?}", row.values());
    }

    // 6. Set-based writes
    println!("\n🧹 Step 6: Mass update and delete");
    let closed = orders
        .mass_update(
            UpdateSet::new().set("status", json!("closed")),
            Some(QueryFilter::eq("status", json!("open"))),
        )
        .await?;
    println!("Closed {} orders", closed);
    let deleted = orders.delete(&order_id).await?;
    println!("Deleted {} order rows", deleted);

    println!("\n🎉 Demo completed");
    Ok(())
}
