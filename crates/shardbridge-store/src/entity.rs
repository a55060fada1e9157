//! Entity model and merge rules.
//!
//! An [`Entity`] is an open JSON record addressed by `(collection, id)`.
//! Fields are grown over time without migration, so the payload is kept as
//! a `serde_json::Map` rather than a fixed struct.
//!
//! ## Merge semantics
//!
//! Patches are applied with [`deep_merge`]: nested objects merge key by key,
//! everything else (arrays, scalars, `null`) replaces the previous value.
//! The write queue records the *column projection* of the merged entity
//! ([`Entity::project`]), so a later patch that touches one key of a nested
//! object never drops sibling keys written by an earlier patch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};

/// Field name holding the entity identifier.
pub const ID_FIELD: &str = "id";

/// A single addressable record.
///
/// Serializes flat: `{"id": "42", "language": "en", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier, unique within its collection.
    pub id: String,
    /// Open record of fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entity {
    /// Create an entity with no fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set(key, value);
        self
    }

    /// Set a top-level field. Writes to `id` are ignored.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if key != ID_FIELD {
            self.fields.insert(key, value);
        }
    }

    /// Look up a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Look up a nested field by path, e.g. `["plan", "active"]`.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.fields.get(*first)?;
        for segment in rest {
            current = current.as_object()?.get(*segment)?;
        }
        Some(current)
    }

    /// Build an entity from a raw JSON object.
    ///
    /// The object must carry an `id` that is a string or a number.
    pub fn from_value(value: Value) -> StoreResult<Self> {
        let Value::Object(mut fields) = value else {
            return Err(StoreError::InvalidArgument(
                "entity must be a JSON object".into(),
            ));
        };
        let id = match fields.remove(ID_FIELD) {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(StoreError::InvalidArgument(
                    "entity is missing a string `id`".into(),
                ));
            }
        };
        Ok(Self { id, fields })
    }

    /// Flatten into a JSON object including `id`.
    pub fn to_value(&self) -> Value {
        let mut out = Map::with_capacity(self.fields.len() + 1);
        out.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        for (k, v) in &self.fields {
            out.insert(k.clone(), v.clone());
        }
        Value::Object(out)
    }

    /// Deep-merge `patch` into this entity. An `id` key in the patch is ignored.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            if key == ID_FIELD {
                continue;
            }
            match self.fields.get_mut(key) {
                Some(existing) => deep_merge(existing, value),
                None => {
                    self.fields.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Return the merged values of the given top-level keys.
    ///
    /// Keys absent from the entity are skipped.
    pub fn project<'a, I>(&self, keys: I) -> Map<String, Value>
    where
        I: IntoIterator<Item = &'a String>,
    {
        keys.into_iter()
            .filter(|k| k.as_str() != ID_FIELD)
            .filter_map(|k| self.fields.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Fill every field missing from `self` with the value from `defaults`,
    /// recursing into nested objects. Existing values always win.
    ///
    /// Returns `true` if anything was added.
    pub fn backfill(&mut self, defaults: &Map<String, Value>) -> bool {
        backfill_map(&mut self.fields, defaults)
    }
}

/// Recursively merge `patch` into `target`.
///
/// Objects merge key by key; any other patch value replaces the target.
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                match dst.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        dst.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (dst, src) => *dst = src.clone(),
    }
}

fn backfill_map(target: &mut Map<String, Value>, defaults: &Map<String, Value>) -> bool {
    let mut changed = false;
    for (key, default) in defaults {
        if key == ID_FIELD {
            continue;
        }
        match target.get_mut(key) {
            None => {
                target.insert(key.clone(), default.clone());
                changed = true;
            }
            Some(Value::Object(existing)) => {
                if let Value::Object(nested) = default {
                    changed |= backfill_map(existing, nested);
                }
            }
            Some(_) => {}
        }
    }
    changed
}

// ── entity reference ─────────────────────────────────────────────────

/// Either a bare id or a full entity; only the id is used for addressing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityRef {
    Id(String),
    Entity(Entity),
}

impl EntityRef {
    /// The addressed id.
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Entity(entity) => &entity.id,
        }
    }
}

impl From<&str> for EntityRef {
    fn from(id: &str) -> Self {
        Self::Id(id.to_string())
    }
}

impl From<String> for EntityRef {
    fn from(id: String) -> Self {
        Self::Id(id)
    }
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self {
        Self::Entity(entity)
    }
}

impl From<&Entity> for EntityRef {
    fn from(entity: &Entity) -> Self {
        Self::Id(entity.id.clone())
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn serializes_flat() {
        let entity = Entity::new("42").with_field("language", json!("en"));
        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(value, json!({"id": "42", "language": "en"}));

        let back: Entity = serde_json::from_value(value).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn from_value_accepts_numeric_id() {
        let entity = Entity::from_value(json!({"id": 7, "a": 1})).unwrap();
        assert_eq!(entity.id, "7");
        assert_eq!(entity.get("a"), Some(&json!(1)));
        assert!(entity.get("id").is_none());
    }

    #[test]
    fn from_value_rejects_missing_id() {
        assert!(Entity::from_value(json!({"a": 1})).is_err());
        assert!(Entity::from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn deep_merge_keeps_nested_siblings() {
        let mut entity = Entity::new("1").with_field(
            "usage",
            json!({"credits_used": 3, "history": ["a"], "model": "small"}),
        );
        entity.apply_patch(&obj(json!({"usage": {"credits_used": 5}})));
        assert_eq!(
            entity.get("usage"),
            Some(&json!({"credits_used": 5, "history": ["a"], "model": "small"}))
        );
    }

    #[test]
    fn arrays_and_nulls_replace() {
        let mut entity = Entity::new("1")
            .with_field("tags", json!(["a", "b"]))
            .with_field("note", json!("x"));
        entity.apply_patch(&obj(json!({"tags": ["c"], "note": null})));
        assert_eq!(entity.get("tags"), Some(&json!(["c"])));
        assert_eq!(entity.get("note"), Some(&Value::Null));
    }

    #[test]
    fn patch_cannot_change_id() {
        let mut entity = Entity::new("1");
        entity.apply_patch(&obj(json!({"id": "2", "a": true})));
        assert_eq!(entity.id, "1");
        assert!(entity.get("id").is_none());
    }

    #[test]
    fn project_returns_merged_columns() {
        let entity = Entity::new("1")
            .with_field("a", json!({"x": 1, "y": 2}))
            .with_field("b", json!(3));
        let keys = vec!["a".to_string(), "missing".to_string()];
        assert_eq!(entity.project(&keys), obj(json!({"a": {"x": 1, "y": 2}})));
    }

    #[test]
    fn backfill_only_fills_missing() {
        let mut entity = Entity::new("1").with_field("settings", json!({"language": "de"}));
        let changed = entity.backfill(&obj(json!({
            "settings": {"language": "en", "beta": false},
            "banned": false
        })));
        assert!(changed);
        assert_eq!(
            entity.get("settings"),
            Some(&json!({"language": "de", "beta": false}))
        );
        assert_eq!(entity.get("banned"), Some(&json!(false)));
        assert!(!entity.backfill(&obj(json!({"banned": true}))));
    }

    #[test]
    fn get_path_walks_objects() {
        let entity = Entity::new("1").with_field("plan", json!({"active": true}));
        assert_eq!(entity.get_path(&["plan", "active"]), Some(&json!(true)));
        assert_eq!(entity.get_path(&["plan", "missing"]), None);
        assert_eq!(entity.get_path(&[]), None);
    }

    #[test]
    fn entity_ref_untagged() {
        let by_id: EntityRef = serde_json::from_value(json!("42")).unwrap();
        assert_eq!(by_id.id(), "42");
        let by_entity: EntityRef = serde_json::from_value(json!({"id": "43", "a": 1})).unwrap();
        assert_eq!(by_entity.id(), "43");
    }
}
