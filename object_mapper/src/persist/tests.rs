use serde_json::json;
use tracing_test::traced_test;

use super::Persister;
use crate::connection::SqlRow;
use crate::dialect::Dialect;
use crate::entity::{Entity, EntityKey, FieldValue, ObjectGraph};
use crate::errors::MapperError;
use crate::testing::{sample_catalog, RecordingSource};

fn order_with_items(graph: &mut ObjectGraph, products: &[&str]) -> (EntityKey, Vec<EntityKey>) {
    let order = graph.add(Entity::new("Order").with("number", "A-1"));
    let items = products
        .iter()
        .map(|product| {
            let item = graph.add(Entity::new("OrderItem").with("product", *product).with("qty", 1));
            graph.push_child(order, "items", item);
            item
        })
        .collect();
    (order, items)
}

#[tokio::test]
async fn test_new_order_inserts_parent_before_sorted_children() {
    let catalog = sample_catalog();
    let dialect = Dialect::postgres();
    let source = RecordingSource::new();
    let mut graph = ObjectGraph::new();
    let (order, items) = order_with_items(&mut graph, &["X", "Y", "Z"]);

    Persister::new(&catalog, &dialect, &source)
        .persist(&mut graph, order)
        .await
        .unwrap();

    let sql = source.sql();
    assert_eq!(sql[0], "INSERT INTO \"orders\" (\"number\") VALUES ($1) RETURNING \"id\"");
    let inserts = source.matching("INSERT INTO \"order_items\"");
    assert_eq!(inserts.len(), 3);
    assert_eq!(
        inserts[2].sql,
        "INSERT INTO \"order_items\" (\"product\", \"qty\", \"order_id\", \"pos\") VALUES ($1, $2, $3, $4) RETURNING \"id\""
    );
    assert_eq!(inserts[2].params, vec![json!("Z"), json!(1), json!(100), json!(2)]);
    assert_eq!(graph.get(order).id(), Some(&json!(100)));
    assert_eq!(graph.get(items[2]).id(), Some(&json!(103)));
    assert!(graph.get(items[0]).is_loaded_for_update());
}

#[tokio::test]
async fn test_removing_middle_item_deletes_it_and_reindexes_the_rest() {
    let catalog = sample_catalog();
    let dialect = Dialect::postgres();
    let mut graph = ObjectGraph::new();
    let (order, items) = order_with_items(&mut graph, &["X", "Y", "Z"]);
    let first = RecordingSource::new();
    Persister::new(&catalog, &dialect, &first)
        .persist(&mut graph, order)
        .await
        .unwrap();

    graph.remove_child(order, "items", items[1]);
    let second = RecordingSource::new();
    Persister::new(&catalog, &dialect, &second)
        .persist(&mut graph, order)
        .await
        .unwrap();

    let statements = second.statements();
    assert_eq!(statements.len(), 2);
    assert_eq!(statements[0].sql, "DELETE FROM \"order_items\" WHERE \"id\" = $1");
    assert_eq!(statements[0].params, vec![json!(102)]);
    assert_eq!(statements[0].delete_target.as_deref(), Some("order_items"));
    assert_eq!(statements[1].sql, "UPDATE \"order_items\" SET \"pos\" = $1 WHERE \"id\" = $2");
    assert_eq!(statements[1].params, vec![json!(1), json!(103)]);
}

#[tokio::test]
async fn test_persisting_unchanged_graph_writes_nothing() {
    let catalog = sample_catalog();
    let dialect = Dialect::postgres();
    let mut graph = ObjectGraph::new();
    let (order, _) = order_with_items(&mut graph, &["X", "Y"]);
    graph
        .get_mut(order)
        .set("labels", FieldValue::ScalarList(vec![json!("rush"), json!("gift")]));
    Persister::new(&catalog, &dialect, &RecordingSource::new())
        .persist(&mut graph, order)
        .await
        .unwrap();

    let again = RecordingSource::new();
    Persister::new(&catalog, &dialect, &again)
        .persist(&mut graph, order)
        .await
        .unwrap();
    assert!(again.statements().is_empty(), "{:?}", again.sql());
}

#[tokio::test]
async fn test_mutual_inner_associations_are_patched_after_both_inserts() {
    let catalog = sample_catalog();
    let dialect = Dialect::postgres();
    let source = RecordingSource::new();
    let mut graph = ObjectGraph::new();
    let ann = graph.add(Entity::new("Person").with("name", "Ann"));
    let bob = graph.add(Entity::new("Person").with("name", "Bob"));
    graph.set_reference(ann, "partner", Some(bob));
    graph.set_reference(bob, "partner", Some(ann));

    Persister::new(&catalog, &dialect, &source)
        .persist(&mut graph, ann)
        .await
        .unwrap();

    let statements = source.statements();
    assert_eq!(statements.len(), 3);
    assert_eq!(
        statements[0].sql,
        "INSERT INTO \"people\" (\"name\", \"partner_id\") VALUES ($1, NULL) RETURNING \"id\""
    );
    assert_eq!(statements[1].params, vec![json!("Bob"), json!(100)]);
    assert_eq!(statements[2].sql, "UPDATE \"people\" SET \"partner_id\" = $1 WHERE \"id\" = $2");
    assert_eq!(statements[2].params, vec![json!(101), json!(100)]);
    assert_eq!(graph.get(bob).id(), Some(&json!(101)));
}

#[tokio::test]
async fn test_inner_reference_to_unparented_composition_child_is_left_pending() {
    let catalog = sample_catalog();
    let dialect = Dialect::postgres();
    let source = RecordingSource::new();
    let mut graph = ObjectGraph::new();
    let ann = graph.add(Entity::new("Person").with("name", "Ann"));
    let item = graph.add(Entity::new("OrderItem").with("product", "X").with("qty", 1));
    graph.set_reference(ann, "favourite_item", Some(item));

    let err = Persister::new(&catalog, &dialect, &source)
        .persist(&mut graph, ann)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MapperError::PendingUpdate { ref entity, ref field } if entity == "Person" && field == "favourite_item"
    ));
    assert!(source.matching("INSERT INTO \"order_items\"").is_empty());
    assert!(graph.get(item).id().is_none());
}

#[tokio::test]
#[traced_test]
async fn test_weak_reference_to_unsaved_entity_is_written_as_null() {
    let catalog = sample_catalog();
    let dialect = Dialect::postgres();
    let source = RecordingSource::new();
    let mut graph = ObjectGraph::new();
    let ann = graph.add(Entity::new("Person").with("name", "Ann"));
    let cid = graph.add(Entity::new("Person").with("name", "Cid"));
    graph.set_reference(ann, "referrer", Some(cid));

    Persister::new(&catalog, &dialect, &source)
        .persist(&mut graph, ann)
        .await
        .unwrap();

    let statements = source.statements();
    assert_eq!(statements.len(), 1);
    assert_eq!(
        statements[0].sql,
        "INSERT INTO \"people\" (\"name\", \"referrer_id\") VALUES ($1, NULL) RETURNING \"id\""
    );
    assert!(graph.get(cid).id().is_none());
    assert!(logs_contain("dropping reference to unsaved weak association target"));
}

#[tokio::test]
async fn test_update_of_entity_not_loaded_for_update_is_rejected() {
    let catalog = sample_catalog();
    let dialect = Dialect::postgres();
    let source = RecordingSource::new();
    let mut graph = ObjectGraph::new();
    let order = graph.add(Entity::new("Order").with_id(5).with("number", "B-2"));

    let err = Persister::new(&catalog, &dialect, &source)
        .persist(&mut graph, order)
        .await
        .unwrap_err();
    assert!(matches!(err, MapperError::NotLoadedForUpdate { ref entity, .. } if entity == "Order"));
    assert!(source.statements().is_empty());
}

#[tokio::test]
async fn test_two_parent_associations_fail_validation() {
    let catalog = sample_catalog();
    let dialect = Dialect::postgres();
    let source = RecordingSource::new();
    let mut graph = ObjectGraph::new();
    let order = graph.add(Entity::new("Order").with_id(1));
    let customer = graph.add(Entity::new("Customer").with_id(2));
    let note = graph.add(Entity::new("Note").with("text", "call back"));
    graph.set_reference(note, "order", Some(order));
    graph.set_reference(note, "customer", Some(customer));

    let err = Persister::new(&catalog, &dialect, &source)
        .persist(&mut graph, note)
        .await
        .unwrap_err();
    assert!(matches!(err, MapperError::Validation { ref field, .. } if field == "customer"));
    assert!(source.statements().is_empty());
}

#[tokio::test]
async fn test_association_target_without_id_fails_validation() {
    let catalog = sample_catalog();
    let dialect = Dialect::postgres();
    let mut graph = ObjectGraph::new();
    let customer = graph.add(Entity::new("Customer").with("name", "Acme"));
    let order = graph.add(Entity::new("Order").with("number", "C-3"));
    graph.set_reference(order, "customer", Some(customer));

    let err = Persister::new(&catalog, &dialect, &RecordingSource::new())
        .persist(&mut graph, order)
        .await
        .unwrap_err();
    assert!(matches!(err, MapperError::Validation { ref entity, ref field, .. } if entity == "Order" && field == "customer"));
}

#[tokio::test]
async fn test_many_to_many_looks_up_then_inserts_missing_links() {
    let catalog = sample_catalog();
    let dialect = Dialect::postgres();
    let source = RecordingSource::new();
    let mut graph = ObjectGraph::new();
    let order = graph.add(Entity::new("Order").with_id(5));
    let urgent = graph.add(Entity::new("Tag").with_id(7));
    let fragile = graph.add(Entity::new("Tag").with_id(8));
    graph.get_mut(order).set("tags", FieldValue::Set(vec![urgent]));
    graph.mark_loaded();
    graph.get_mut(order).set("tags", FieldValue::Set(vec![urgent, fragile]));
    source.respond("FROM \"order_tags\"", vec![SqlRow::from_pairs(vec![("t1_tag_id", json!(7))])]);

    Persister::new(&catalog, &dialect, &source)
        .persist(&mut graph, order)
        .await
        .unwrap();

    let lookups = source.matching("SELECT");
    assert_eq!(lookups.len(), 2);
    assert_eq!(lookups[1].params, vec![json!(5), json!(8)]);
    let inserts = source.matching("INSERT INTO \"order_tags\"");
    assert_eq!(inserts.len(), 1);
    assert_eq!(inserts[0].sql, "INSERT INTO \"order_tags\" (\"order_id\", \"tag_id\") VALUES ($1, $2)");
    assert_eq!(inserts[0].params, vec![json!(5), json!(8)]);
    let deletes = source.matching("DELETE");
    assert_eq!(
        deletes[0].sql,
        "DELETE FROM \"order_tags\" WHERE \"order_id\" = $1 AND \"tag_id\" NOT IN ($2, $3)"
    );
}

#[tokio::test]
async fn test_unchanged_links_issue_no_statements() {
    let catalog = sample_catalog();
    let dialect = Dialect::postgres();
    let source = RecordingSource::new();
    let mut graph = ObjectGraph::new();
    let order = graph.add(Entity::new("Order").with_id(5));
    let urgent = graph.add(Entity::new("Tag").with_id(7));
    let fragile = graph.add(Entity::new("Tag").with_id(8));
    graph.get_mut(order).set("tags", FieldValue::Set(vec![urgent, fragile]));
    graph.mark_loaded();

    Persister::new(&catalog, &dialect, &source)
        .persist(&mut graph, order)
        .await
        .unwrap();

    assert!(source.statements().is_empty());
}

#[tokio::test]
async fn test_changed_scalar_collection_is_replaced() {
    let catalog = sample_catalog();
    let dialect = Dialect::postgres();
    let source = RecordingSource::new();
    let mut graph = ObjectGraph::new();
    let order = graph.add(Entity::new("Order").with_id(5));
    graph
        .get_mut(order)
        .set("labels", FieldValue::ScalarList(vec![json!("old")]));
    graph.mark_loaded();
    graph
        .get_mut(order)
        .set("labels", FieldValue::ScalarList(vec![json!("a"), json!("b")]));

    Persister::new(&catalog, &dialect, &source)
        .persist(&mut graph, order)
        .await
        .unwrap();

    let statements = source.statements();
    assert_eq!(statements.len(), 2);
    assert_eq!(statements[0].sql, "DELETE FROM \"order_labels\" WHERE \"order_id\" = $1");
    assert_eq!(
        statements[1].sql,
        "INSERT INTO \"order_labels\" (\"order_id\", \"label\", \"pos\") VALUES ($1, $2, $3), ($4, $5, $6)"
    );
    assert_eq!(
        statements[1].params,
        vec![json!(5), json!("a"), json!(0), json!(5), json!("b"), json!(1)]
    );
}

#[tokio::test]
async fn test_composition_tree_writes_every_level() {
    let catalog = sample_catalog();
    let dialect = Dialect::postgres();
    let source = RecordingSource::new();
    let mut graph = ObjectGraph::new();
    let root = graph.add(Entity::new("Category").with("name", "root"));
    let child = graph.add(Entity::new("Category").with("name", "child"));
    let leaf = graph.add(Entity::new("Category").with("name", "leaf"));
    graph.push_child(root, "children", child);
    graph.push_child(child, "children", leaf);

    Persister::new(&catalog, &dialect, &source)
        .persist(&mut graph, root)
        .await
        .unwrap();

    let inserts = source.matching("INSERT INTO \"categories\"");
    assert_eq!(inserts.len(), 3);
    assert_eq!(inserts[0].params, vec![json!("root")]);
    assert_eq!(inserts[1].params, vec![json!("child"), json!(100), json!(0)]);
    assert_eq!(inserts[2].params, vec![json!("leaf"), json!(101), json!(0)]);
}

#[tokio::test]
async fn test_delete_cascades_through_children_links_and_collections() {
    let catalog = sample_catalog();
    let dialect = Dialect::postgres();
    let source = RecordingSource::new();
    source.respond(
        "FROM \"order_items\"",
        vec![
            SqlRow::from_pairs(vec![("t1_id", json!(11))]),
            SqlRow::from_pairs(vec![("t1_id", json!(12))]),
        ],
    );

    let affected = Persister::new(&catalog, &dialect, &source)
        .delete_cascade("Order".to_string(), json!(5))
        .await
        .unwrap();

    assert_eq!(affected, 1);
    let sql = source.sql();
    assert_eq!(
        sql,
        vec![
            "SELECT t1.\"id\" AS \"t1_id\" FROM \"order_items\" t1 WHERE t1.\"order_id\" = $1".to_string(),
            "DELETE FROM \"order_items\" WHERE \"id\" = $1".to_string(),
            "DELETE FROM \"order_items\" WHERE \"id\" = $1".to_string(),
            "DELETE FROM \"order_tags\" WHERE \"order_id\" = $1".to_string(),
            "DELETE FROM \"order_labels\" WHERE \"order_id\" = $1".to_string(),
            "DELETE FROM \"order_attributes\" WHERE \"order_id\" = $1".to_string(),
            "DELETE FROM \"orders\" WHERE \"id\" = $1".to_string(),
        ]
    );
    assert_eq!(
        source.statements().last().and_then(|s| s.delete_target.clone()).as_deref(),
        Some("orders")
    );
}
