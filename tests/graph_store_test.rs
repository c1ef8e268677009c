//! Integration tests against PostgreSQL
//!
//! Persist, load, diff, page and delete object graphs through a live database.
//! Each test works on its own table set. Tests return early when `DATABASE_URL` is unset.

use relhaus::prelude::*;

async fn setup_pool() -> Option<PgPool> {
    let database_url = std::env::var("DATABASE_URL").ok()?;
    Some(
        PgPool::connect(&database_url)
            .await
            .expect("Failed to connect to database"),
    )
}

fn catalog(prefix: &str) -> SchemaCatalog {
    let customer = EntityDescriptor::builder("Customer")
        .table(&format!("{}_customers", prefix))
        .scalar("name", "name")
        .scalar("profile", "profile")
        .build()
        .unwrap();
    let order = EntityDescriptor::builder("Order")
        .table(&format!("{}_orders", prefix))
        .scalar("number", "number")
        .scalar("status", "status")
        .relation("customer", RelationDescriptor::association("Customer", "customer_id"))
        .relation(
            "items",
            RelationDescriptor::composition("OrderItem", "order_id", Cardinality::List).sorted_by("pos"),
        )
        .relation(
            "tags",
            RelationDescriptor::many_to_many(
                "Tag",
                &format!("{}_order_tags", prefix),
                "order_id",
                "tag_id",
                Cardinality::Set,
            ),
        )
        .scalar_collection(
            "notes",
            ScalarCollection::new(&format!("{}_order_notes", prefix), "order_id", "note", Cardinality::List)
                .sorted_by("pos"),
        )
        .build()
        .unwrap();
    let item = EntityDescriptor::builder("OrderItem")
        .table(&format!("{}_order_items", prefix))
        .scalar("product", "product")
        .scalar("qty", "qty")
        .build()
        .unwrap();
    let tag = EntityDescriptor::builder("Tag")
        .table(&format!("{}_tags", prefix))
        .scalar("name", "name")
        .build()
        .unwrap();

    SchemaCatalog::builder()
        .entity(customer)
        .entity(order)
        .entity(item)
        .entity(tag)
        .build()
        .unwrap()
}

async fn create_tables(pool: &PgPool, prefix: &str) {
    drop_tables(pool, prefix).await;
    let statements = [
        format!("CREATE TABLE {p}_customers (id SERIAL PRIMARY KEY, name TEXT NOT NULL, profile JSONB)", p = prefix),
        format!("CREATE TABLE {p}_tags (id SERIAL PRIMARY KEY, name TEXT NOT NULL)", p = prefix),
        format!(
            "CREATE TABLE {p}_orders (id SERIAL PRIMARY KEY, number TEXT NOT NULL, status TEXT NOT NULL, \
             customer_id INTEGER REFERENCES {p}_customers(id))",
            p = prefix
        ),
        format!(
            "CREATE TABLE {p}_order_items (id SERIAL PRIMARY KEY, order_id INTEGER REFERENCES {p}_orders(id), \
             pos INTEGER, product TEXT NOT NULL, qty INTEGER NOT NULL)",
            p = prefix
        ),
        format!(
            "CREATE TABLE {p}_order_tags (order_id INTEGER REFERENCES {p}_orders(id), \
             tag_id INTEGER REFERENCES {p}_tags(id))",
            p = prefix
        ),
        format!(
            "CREATE TABLE {p}_order_notes (order_id INTEGER REFERENCES {p}_orders(id), pos INTEGER, note TEXT)",
            p = prefix
        ),
    ];
    for statement in statements {
        sqlx::query(&statement)
            .execute(pool)
            .await
            .expect("Failed to create table");
    }
}

async fn drop_tables(pool: &PgPool, prefix: &str) {
    let _ = sqlx::query(&format!(
        "DROP TABLE IF EXISTS {p}_order_notes, {p}_order_tags, {p}_order_items, {p}_orders, {p}_tags, {p}_customers CASCADE",
        p = prefix
    ))
    .execute(pool)
    .await;
}

async fn setup(prefix: &str) -> Option<(PgPool, RelHaus)> {
    let pool = setup_pool().await?;
    create_tables(&pool, prefix).await;
    let relhaus = RelHaus::with_pool(pool.clone(), catalog(prefix), Dialect::postgres());
    Some((pool, relhaus))
}

/// Order A-1 for Ada with two items, one tag and two notes
async fn seed_order(store: &EntityStore) -> Value {
    let mut graph = ObjectGraph::new();
    let ada = graph.add(
        Entity::new("Customer")
            .with("name", "Ada")
            .with("profile", json!({"tier": "gold", "since": 2019})),
    );
    let tag = graph.add(Entity::new("Tag").with("name", "urgent"));
    let mut draft = Entity::new("Order").with("number", "A-1").with("status", "open");
    draft.set("notes", FieldValue::ScalarList(vec![json!("call first"), json!("fragile")]));
    let order = graph.add(draft);
    graph.set_reference(order, "customer", Some(ada));
    graph.push_child(order, "tags", tag);
    for (product, qty) in [("keyboard", 1), ("cable", 3)] {
        let item = graph.add(Entity::new("OrderItem").with("product", product).with("qty", qty));
        graph.push_child(order, "items", item);
    }

    store.persist(&mut graph, order).await.unwrap();
    assert!(graph.get(ada).id().is_some(), "referenced customer gets an id");
    graph.get(order).id().cloned().unwrap()
}

const PATHS: &[&str] = &["number", "status", "customer.name", "customer.profile", "items", "tags.name", "notes"];

#[tokio::test]
async fn test_persist_and_load_graph() {
    let Some((pool, relhaus)) = setup("rh_load").await else {
        return;
    };
    let orders = relhaus.store("Order").unwrap();
    let id = seed_order(&orders).await;

    let loaded = orders.find_by_id(&id, PATHS).await.unwrap().unwrap();
    let json = loaded.to_json();
    let order = &json[0];

    assert_eq!(order["number"], "A-1");
    assert_eq!(order["customer"]["name"], "Ada");
    assert_eq!(order["customer"]["profile"]["tier"], "gold");
    assert_eq!(order["items"][0]["product"], "keyboard");
    assert_eq!(order["items"][1]["product"], "cable");
    assert_eq!(order["tags"][0]["name"], "urgent");
    assert_eq!(order["notes"], json!(["call first", "fragile"]));

    drop_tables(&pool, "rh_load").await;
}

#[tokio::test]
async fn test_loaded_graph_writes_back_only_changes() {
    let Some((pool, relhaus)) = setup("rh_diff").await else {
        return;
    };
    let orders = relhaus.store("Order").unwrap();
    let id = seed_order(&orders).await;

    let mut loaded = orders
        .find_for_update(PATHS, QueryBuilder::new().filter(QueryFilter::eq("id", id.clone())))
        .await
        .unwrap();
    let root = loaded.root().unwrap();
    loaded.graph.set_scalar(root, "status", "shipped");
    let first = loaded.graph.get(root).related("items")[0];
    loaded.graph.remove_child(root, "items", first);
    orders.persist(&mut loaded.graph, root).await.unwrap();

    let reloaded = orders.find_by_id(&id, PATHS).await.unwrap().unwrap().to_json();
    assert_eq!(reloaded[0]["status"], "shipped");
    assert_eq!(reloaded[0]["items"].as_array().unwrap().len(), 1);
    assert_eq!(reloaded[0]["items"][0]["product"], "cable");

    // The removed composition child is deleted, not orphaned
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rh_diff_order_items")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 1);

    drop_tables(&pool, "rh_diff").await;
}

#[tokio::test]
async fn test_count_page_and_mass_update() {
    let Some((pool, relhaus)) = setup("rh_page").await else {
        return;
    };
    let orders = relhaus.store("Order").unwrap();
    for number in ["A-1", "A-2", "A-3", "A-4"] {
        let mut graph = ObjectGraph::new();
        let root = graph.add(Entity::new("Order").with("number", number).with("status", "open"));
        orders.persist(&mut graph, root).await.unwrap();
    }

    let open = QueryBuilder::new().filter(QueryFilter::eq("status", json!("open")));
    assert_eq!(orders.count(open.clone()).await.unwrap(), 4);

    let page = orders
        .find_list(
            &["number"],
            QueryBuilder::new()
                .order_by("number", SortOrder::Desc)
                .paginate(Pagination::new().with_limit(2).with_offset(1)),
        )
        .await
        .unwrap()
        .to_json();
    let numbers: Vec<&str> = page.as_array().unwrap().iter().filter_map(|o| o["number"].as_str()).collect();
    assert_eq!(numbers, vec!["A-3", "A-2"]);

    let changed = orders
        .mass_update(
            UpdateSet::new().set("status", json!("closed")),
            Some(QueryFilter::in_values("number", vec![json!("A-1"), json!("A-2")])),
        )
        .await
        .unwrap();
    assert_eq!(changed, 2);
    assert_eq!(orders.count(open).await.unwrap(), 2);

    drop_tables(&pool, "rh_page").await;
}

#[tokio::test]
async fn test_delete_cascades_compositions_and_links() {
    let Some((pool, relhaus)) = setup("rh_delete").await else {
        return;
    };
    let orders = relhaus.store("Order").unwrap();
    let id = seed_order(&orders).await;

    assert_eq!(orders.delete(&id).await.unwrap(), 1);
    assert!(orders.find_by_id(&id, PATHS).await.unwrap().is_none());

    for table in ["rh_delete_order_items", "rh_delete_order_tags", "rh_delete_order_notes"] {
        let rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 0, "{} should be empty", table);
    }
    // Associations are not owned by the order
    let customers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rh_delete_customers")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(customers, 1);

    drop_tables(&pool, "rh_delete").await;
}
