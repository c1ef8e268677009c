//! Object graph arena
//!
//! Entities live in an [`ObjectGraph`] and reference each other through
//! [`EntityKey`] handles, so cyclic graphs (parent back-references, mutual
//! inner associations) need no shared ownership. The graph also holds the
//! identity index used by the materializer: one instance per `(type, id)`.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::id_type::UniversalId;

/// Handle to an entity inside its [`ObjectGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(usize);

impl EntityKey {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Value of one entity field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    /// Single-valued relationship; `None` means loaded and empty
    Reference(Option<EntityKey>),
    List(Vec<EntityKey>),
    Set(Vec<EntityKey>),
    Map(Vec<(Value, EntityKey)>),
    ScalarList(Vec<Value>),
    ScalarSet(Vec<Value>),
    ScalarMap(Vec<(Value, Value)>),
}

impl FieldValue {
    /// Entities referenced by a relationship value, in order
    pub fn entity_keys(&self) -> Vec<EntityKey> {
        match self {
            FieldValue::Reference(Some(key)) => vec![*key],
            FieldValue::List(keys) | FieldValue::Set(keys) => keys.clone(),
            FieldValue::Map(entries) => entries.iter().map(|(_, key)| *key).collect(),
            _ => Vec::new(),
        }
    }
}

/// Persisted state captured by [`ObjectGraph::mark_loaded`]
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedState {
    pub fields: BTreeMap<String, FieldValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    type_name: String,
    id: Option<Value>,
    fields: BTreeMap<String, FieldValue>,
    loaded: Option<LoadedState>,
}

impl Entity {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            id: None,
            fields: BTreeMap::new(),
            loaded: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.set_id(id.into());
        self
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set_scalar(field, value.into());
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    pub fn set_id(&mut self, id: Value) {
        self.id = (!id.is_null()).then_some(id);
    }

    pub fn universal_id(&self) -> Option<UniversalId> {
        self.id.as_ref().and_then(UniversalId::from_value)
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: &str, value: FieldValue) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn scalar(&self, field: &str) -> Option<&Value> {
        match self.fields.get(field) {
            Some(FieldValue::Scalar(value)) => Some(value),
            _ => None,
        }
    }

    pub fn set_scalar(&mut self, field: &str, value: Value) {
        self.set(field, FieldValue::Scalar(value));
    }

    pub fn reference(&self, field: &str) -> Option<EntityKey> {
        match self.fields.get(field) {
            Some(FieldValue::Reference(key)) => *key,
            _ => None,
        }
    }

    pub fn set_reference(&mut self, field: &str, target: Option<EntityKey>) {
        self.set(field, FieldValue::Reference(target));
    }

    /// Entities held by a relationship field, empty when unset
    pub fn related(&self, field: &str) -> Vec<EntityKey> {
        self.fields
            .get(field)
            .map(FieldValue::entity_keys)
            .unwrap_or_default()
    }

    pub fn loaded(&self) -> Option<&LoadedState> {
        self.loaded.as_ref()
    }

    pub fn is_loaded_for_update(&self) -> bool {
        self.loaded.is_some()
    }

    pub(crate) fn capture_loaded(&mut self) {
        self.loaded = Some(LoadedState {
            fields: self.fields.clone(),
        });
    }
}

/// Arena of entities with an identity index
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    entities: Vec<Entity>,
    identity: HashMap<(String, UniversalId), EntityKey>,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity, indexing it when it already carries an id
    pub fn add(&mut self, entity: Entity) -> EntityKey {
        let key = EntityKey(self.entities.len());
        self.entities.push(entity);
        self.index_identity(key);
        key
    }

    pub fn get(&self, key: EntityKey) -> &Entity {
        &self.entities[key.0]
    }

    pub fn get_mut(&mut self, key: EntityKey) -> &mut Entity {
        &mut self.entities[key.0]
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = EntityKey> {
        (0..self.entities.len()).map(EntityKey)
    }

    /// Look up the instance registered for `(type_name, id)`
    pub fn find(&self, type_name: &str, id: &Value) -> Option<EntityKey> {
        let id = UniversalId::from_value(id)?;
        self.identity.get(&(type_name.to_string(), id)).copied()
    }

    /// Assign an id and register it in the identity index
    pub fn assign_id(&mut self, key: EntityKey, id: Value) {
        self.entities[key.0].set_id(id);
        self.index_identity(key);
    }

    fn index_identity(&mut self, key: EntityKey) {
        let entity = &self.entities[key.0];
        if let Some(id) = entity.universal_id() {
            self.identity
                .entry((entity.type_name.clone(), id))
                .or_insert(key);
        }
    }

    pub fn set_scalar(&mut self, key: EntityKey, field: &str, value: impl Into<Value>) {
        self.get_mut(key).set_scalar(field, value.into());
    }

    pub fn set_reference(&mut self, key: EntityKey, field: &str, target: Option<EntityKey>) {
        self.get_mut(key).set_reference(field, target);
    }

    /// Append `child` to the list-valued `field` of `parent`
    pub fn push_child(&mut self, parent: EntityKey, field: &str, child: EntityKey) {
        let entity = self.get_mut(parent);
        match entity.fields.get_mut(field) {
            Some(FieldValue::List(keys)) | Some(FieldValue::Set(keys)) => keys.push(child),
            _ => entity.set(field, FieldValue::List(vec![child])),
        }
    }

    /// Remove `child` from every collection of `field` on `parent`
    pub fn remove_child(&mut self, parent: EntityKey, field: &str, child: EntityKey) {
        match self.get_mut(parent).fields.get_mut(field) {
            Some(FieldValue::List(keys)) | Some(FieldValue::Set(keys)) => keys.retain(|k| *k != child),
            Some(FieldValue::Map(entries)) => entries.retain(|(_, k)| *k != child),
            Some(FieldValue::Reference(target)) if *target == Some(child) => *target = None,
            _ => {}
        }
    }

    /// Snapshot every entity's current fields as its loaded state
    pub fn mark_loaded(&mut self) {
        for entity in &mut self.entities {
            if entity.id.is_some() {
                entity.capture_loaded();
            }
        }
    }

    /// Render the graph reachable from `root` as JSON, for comparisons and debugging.
    ///
    /// Entities already on the current path render as `{"$ref": id}`. Sets and
    /// scalar sets are sorted so the rendering is independent of load order.
    pub fn to_json(&self, root: EntityKey) -> Value {
        let mut path = HashSet::new();
        self.render(root, &mut path)
    }

    fn render(&self, key: EntityKey, path: &mut HashSet<EntityKey>) -> Value {
        let entity = self.get(key);
        if !path.insert(key) {
            return serde_json::json!({ "$ref": entity.id.clone().unwrap_or(Value::Null) });
        }

        let mut out = Map::new();
        out.insert("$type".to_string(), Value::String(entity.type_name.clone()));
        out.insert("$id".to_string(), entity.id.clone().unwrap_or(Value::Null));
        for (name, value) in &entity.fields {
            let rendered = match value {
                FieldValue::Scalar(v) => v.clone(),
                FieldValue::Reference(None) => Value::Null,
                FieldValue::Reference(Some(k)) => self.render(*k, path),
                FieldValue::List(keys) => {
                    Value::Array(keys.iter().map(|k| self.render(*k, path)).collect())
                }
                FieldValue::Set(keys) => {
                    let mut items: Vec<Value> = keys.iter().map(|k| self.render(*k, path)).collect();
                    items.sort_by_key(|v| v.to_string());
                    Value::Array(items)
                }
                FieldValue::Map(entries) => {
                    let mut items: Vec<Value> = entries
                        .iter()
                        .map(|(k, v)| serde_json::json!([k, self.render(*v, path)]))
                        .collect();
                    items.sort_by_key(|v| v.to_string());
                    Value::Array(items)
                }
                FieldValue::ScalarList(values) => Value::Array(values.clone()),
                FieldValue::ScalarSet(values) => {
                    let mut items = values.clone();
                    items.sort_by_key(|v| v.to_string());
                    Value::Array(items)
                }
                FieldValue::ScalarMap(entries) => {
                    let mut items: Vec<Value> =
                        entries.iter().map(|(k, v)| serde_json::json!([k, v])).collect();
                    items.sort_by_key(|v| v.to_string());
                    Value::Array(items)
                }
            };
            out.insert(name.clone(), rendered);
        }

        path.remove(&key);
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_index() {
        let mut graph = ObjectGraph::new();
        let a = graph.add(Entity::new("Order").with_id(1));
        let b = graph.add(Entity::new("Order"));
        assert_eq!(graph.find("Order", &json!(1)), Some(a));
        assert_eq!(graph.find("Customer", &json!(1)), None);
        assert_eq!(graph.find("Order", &json!(2)), None);

        graph.assign_id(b, json!(2));
        assert_eq!(graph.find("Order", &json!(2)), Some(b));
    }

    #[test]
    fn test_mark_loaded_snapshots_only_persisted() {
        let mut graph = ObjectGraph::new();
        let stored = graph.add(Entity::new("Order").with_id(1).with("number", "A-1"));
        let fresh = graph.add(Entity::new("Order").with("number", "A-2"));
        graph.mark_loaded();

        graph.set_scalar(stored, "number", "A-1b");
        assert!(graph.get(stored).is_loaded_for_update());
        assert!(!graph.get(fresh).is_loaded_for_update());
        assert_eq!(
            graph.get(stored).loaded().unwrap().fields.get("number"),
            Some(&FieldValue::Scalar(json!("A-1")))
        );
    }

    #[test]
    fn test_children_and_removal() {
        let mut graph = ObjectGraph::new();
        let order = graph.add(Entity::new("Order"));
        let x = graph.add(Entity::new("Item"));
        let y = graph.add(Entity::new("Item"));
        graph.push_child(order, "items", x);
        graph.push_child(order, "items", y);
        assert_eq!(graph.get(order).related("items"), vec![x, y]);

        graph.remove_child(order, "items", x);
        assert_eq!(graph.get(order).related("items"), vec![y]);
    }

    #[test]
    fn test_to_json_breaks_cycles() {
        let mut graph = ObjectGraph::new();
        let order = graph.add(Entity::new("Order").with_id(1));
        let item = graph.add(Entity::new("Item").with_id(5));
        graph.push_child(order, "items", item);
        graph.set_reference(item, "order", Some(order));

        let rendered = graph.to_json(order);
        assert_eq!(rendered["items"][0]["$id"], json!(5));
        assert_eq!(rendered["items"][0]["order"], json!({"$ref": 1}));
    }
}
