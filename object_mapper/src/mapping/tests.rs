use super::*;
use crate::testing::sample_catalog;

/// Every non-root node joins onto an alias registered before it
fn assert_join_order(mapping: &Mapping) {
    let mut seen: Vec<&str> = Vec::new();
    for node in mapping.tables() {
        if let Some(join_alias) = &node.join_alias {
            assert!(
                seen.contains(&join_alias.as_str()),
                "{} joins unknown alias {}",
                node.alias,
                join_alias
            );
        } else {
            assert!(node.path.is_empty());
        }
        assert!(!seen.contains(&node.alias.as_str()), "duplicate alias {}", node.alias);
        seen.push(&node.alias);
    }
}

#[test]
fn test_new_mapping_holds_only_the_root() {
    let catalog = sample_catalog();
    let mapping = Mapping::new(&catalog, "Order").unwrap();

    assert_eq!(mapping.tables().len(), 1);
    let root = mapping.root().unwrap();
    assert_eq!(root.alias, "t0");
    assert_eq!(root.table, "orders");
    assert_eq!(root.kind(), NodeKind::Root);
    assert_eq!(mapping.id_field("").unwrap().column, "id");
}

#[test]
fn test_aliases_are_unique_and_joins_resolve() {
    let catalog = sample_catalog();
    let mapping = Mapping::build(
        &catalog,
        "Order",
        &["number", "items.product", "tags.name", "labels", "attributes", "customer.name"],
    )
    .unwrap();

    assert_join_order(&mapping);
    let aliases: Vec<&str> = mapping.tables().iter().map(|t| t.alias.as_str()).collect();
    assert_eq!(aliases, vec!["t0", "t1", "t2", "t3", "t4", "t5", "t6"]);
}

#[test]
fn test_adding_the_same_path_twice_is_idempotent() {
    let catalog = sample_catalog();
    let mut mapping = Mapping::build(&catalog, "Order", &["items.qty"]).unwrap();
    let before = mapping.tables().len();
    mapping.add_attribute(&catalog, "items.qty").unwrap();
    mapping.add_attribute(&catalog, "items").unwrap();
    assert_eq!(mapping.tables().len(), before);
}

#[test]
fn test_composition_joins_child_fk_to_parent_id() {
    let catalog = sample_catalog();
    let mapping = Mapping::build(&catalog, "Order", &["items"]).unwrap();

    let items = mapping.table("items").unwrap();
    assert_eq!(items.join_alias.as_deref(), Some("t0"));
    assert_eq!(items.column.as_deref(), Some("order_id"));
    assert_eq!(items.join_column.as_deref(), Some("id"));
    assert_eq!(mapping.relation_field("items", SORT_FIELD).unwrap().column, "pos");
    // "*" semantics: every scalar of the child is bound
    assert!(mapping.field("items", "product").is_some());
    assert!(mapping.field("items", "qty").is_some());
}

#[test]
fn test_association_joins_owner_fk_to_target_id() {
    let catalog = sample_catalog();
    let mapping = Mapping::build(&catalog, "Order", &["customer"]).unwrap();

    let customer = mapping.table("customer").unwrap();
    assert_eq!(customer.join_column.as_deref(), Some("customer_id"));
    assert_eq!(customer.column.as_deref(), Some("id"));
    let tax = mapping.field("customer", "tax_number").unwrap();
    assert_eq!(tax.encryption_key.as_deref(), Some("k1"));
}

#[test]
fn test_many_to_many_goes_through_a_join_table_node() {
    let catalog = sample_catalog();
    let mapping = Mapping::build(&catalog, "Order", &["tags"]).unwrap();

    let link = mapping.table(".tags").unwrap();
    assert_eq!(link.kind(), NodeKind::JoinTable);
    assert_eq!(link.entity, None);
    assert_eq!(link.table, "order_tags");
    assert_eq!(link.column.as_deref(), Some("order_id"));

    let tags = mapping.table("tags").unwrap();
    assert_eq!(tags.join_alias.as_deref(), Some(link.alias.as_str()));
    assert_eq!(tags.join_column.as_deref(), Some("tag_id"));
    assert_eq!(mapping.owner_of(tags).unwrap().path, "");
}

#[test]
fn test_scalar_collection_registers_pseudo_fields() {
    let catalog = sample_catalog();
    let mapping = Mapping::build(&catalog, "Order", &["labels", "attributes"]).unwrap();

    let labels = mapping.table("@labels").unwrap();
    assert_eq!(labels.kind(), NodeKind::Collection);
    assert_eq!(labels.table, "order_labels");
    let roles: Vec<FieldRole> = mapping.fields_of("@labels").map(|f| f.role).collect();
    assert_eq!(roles, vec![FieldRole::Value, FieldRole::Parent, FieldRole::Sort]);

    assert_eq!(mapping.field("@attributes", KEY_FIELD).unwrap().column, "name");
    assert_eq!(mapping.field("@attributes", VALUE_FIELD).unwrap().column, "value");
    assert_eq!(mapping.field("@attributes", PARENT_FIELD).unwrap().column, "order_id");
}

#[test]
fn test_resolve_attribute() {
    let catalog = sample_catalog();
    let mapping = Mapping::build(&catalog, "Order", &["items.qty"]).unwrap();

    let qty = mapping.resolve_attribute("items.qty").unwrap();
    assert_eq!(qty.alias, "t1");
    assert_eq!(mapping.resolve_attribute("id").unwrap().role, FieldRole::Id);
    assert!(matches!(
        mapping.resolve_attribute("items.price"),
        Err(MapperError::UnknownPath(_))
    ));
}

#[test]
fn test_unknown_field_is_a_configuration_error() {
    let catalog = sample_catalog();
    assert!(Mapping::build(&catalog, "Order", &["invoice"]).is_err());
    assert!(Mapping::build(&catalog, "Nope", &[]).is_err());
}

#[test]
fn test_tree_is_bound_one_level_and_repeated_segments_collapse() {
    let catalog = sample_catalog();
    let mapping = Mapping::build(&catalog, "Category", &["children.children.name"]).unwrap();

    assert!(mapping.find_table("children").is_some());
    assert!(mapping.find_table("children.children").is_none());
    assert_eq!(mapping.tables().len(), 2);
}

#[test]
fn test_replicate_subtree_extends_a_tree_one_level() {
    let catalog = sample_catalog();
    let mut mapping = Mapping::build(&catalog, "Category", &["name", "children"]).unwrap();

    mapping.replicate_subtree("children", "children.children").unwrap();

    let deeper = mapping.table("children.children").unwrap();
    let level = mapping.table("children").unwrap();
    assert_eq!(deeper.join_alias.as_deref(), Some(level.alias.as_str()));
    assert_eq!(deeper.column, level.column);
    assert_ne!(deeper.alias, level.alias);
    assert!(mapping.field("children.children", "name").is_some());
    assert!(mapping.field("children.children", SORT_FIELD).is_some());
    assert_join_order(&mapping);

    assert!(matches!(
        mapping.replicate_subtree("children", "children.children"),
        Err(MapperError::DuplicatePath(_))
    ));
}

#[test]
fn test_extract_subgraph_reroots_the_join_closure() {
    let catalog = sample_catalog();
    let mut mapping = Mapping::build(&catalog, "Category", &["name", "children"]).unwrap();
    mapping.replicate_subtree("children", "children.children").unwrap();
    let level_alias = mapping.table("children").unwrap().alias.clone();

    let subgraph = mapping.extract_subgraph("children").unwrap();

    assert_eq!(subgraph.root_entity(), "Category");
    let root = subgraph.root().unwrap();
    assert_eq!(root.alias, level_alias);
    assert_eq!(root.join_alias, None);
    assert_eq!(subgraph.tables().len(), 2);
    assert!(subgraph.find_table("children").is_some());
    // The root has no parent link, so its sort column is dropped
    assert!(subgraph.field("", SORT_FIELD).is_none());
    assert!(subgraph.field("children", SORT_FIELD).is_some());
}

#[test]
fn test_write_fields_bind_owned_foreign_keys() {
    let catalog = sample_catalog();
    let mut mapping = Mapping::new(&catalog, "Note").unwrap();
    mapping.ensure_write_fields(&catalog, "").unwrap();

    let order_fk = mapping.field("", "order").unwrap();
    assert_eq!(order_fk.role, FieldRole::ForeignKey);
    assert_eq!(order_fk.column, "order_id");
    assert!(mapping.field("", "text").is_some());
}

#[test]
fn test_split_and_join_paths() {
    assert_eq!(split_path("items.product.name"), ("items.product", "name"));
    assert_eq!(split_path("name"), ("", "name"));
    assert_eq!(join_path("", "items"), "items");
    assert_eq!(join_path("items", "product"), "items.product");
}
