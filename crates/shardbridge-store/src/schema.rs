//! Entity schema registry.
//!
//! Every collection has an [`EntitySchema`] that knows how to manufacture a
//! default entity (the *template*) and how to normalize a raw stored row into
//! canonical shape. Rows are grown over time without migrations, so
//! normalization back-fills missing fields and recomputes derived ones.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::entity::Entity;
use crate::error::{StoreError, StoreResult};

/// Collection of user records.
pub const USERS: &str = "users";
/// Collection of tenant (server/guild) records.
pub const TENANTS: &str = "tenants";
/// Collection of usage metric records.
pub const METRICS: &str = "metrics";

/// Per-collection shape rules.
pub trait EntitySchema: Send + Sync {
    /// Build the default entity for an id that has never been persisted.
    fn template(&self, id: &str) -> Entity;

    /// Normalize a raw row. `None` means "use the raw row unmodified".
    fn process(&self, raw: &Entity) -> Option<Entity>;
}

// ── registry ─────────────────────────────────────────────────────────

/// Lookup table from collection name to schema.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<dyn EntitySchema>>,
}

impl SchemaRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `users`, `tenants` and `metrics` schemas.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(USERS, UserSchema);
        registry.register(TENANTS, TenantSchema);
        registry.register(METRICS, MetricsSchema);
        registry
    }

    /// Register (or replace) the schema for `collection`.
    pub fn register(&mut self, collection: impl Into<String>, schema: impl EntitySchema + 'static) {
        let collection = collection.into();
        debug!(collection = %collection, "schema registered");
        self.schemas.insert(collection, Arc::new(schema));
    }

    /// Look up the schema for `collection`.
    pub fn get(&self, collection: &str) -> StoreResult<Arc<dyn EntitySchema>> {
        self.schemas
            .get(collection)
            .cloned()
            .ok_or_else(|| StoreError::SchemaNotFound {
                collection: collection.to_string(),
            })
    }

    /// Whether `collection` has a schema.
    pub fn contains(&self, collection: &str) -> bool {
        self.schemas.contains_key(collection)
    }

    /// Registered collection names, sorted.
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.keys().cloned().collect();
        names.sort();
        names
    }

    /// Template for `id`, already run through `process`.
    pub fn instantiate(&self, collection: &str, id: &str) -> StoreResult<Entity> {
        let schema = self.get(collection)?;
        let template = schema.template(id);
        Ok(schema.process(&template).unwrap_or(template))
    }

    /// Run `process` over a raw row, falling back to the row itself.
    pub fn normalize(&self, collection: &str, raw: Entity) -> StoreResult<Entity> {
        let schema = self.get(collection)?;
        Ok(schema.process(&raw).unwrap_or(raw))
    }
}

fn now_millis() -> Value {
    json!(Utc::now().timestamp_millis())
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ── users ────────────────────────────────────────────────────────────

/// User records: language preference, ban flag, credit usage and plan.
///
/// `plan.total` is the sum of all `plan.grants[].amount`, and `plan.active`
/// is true while the total exceeds `usage.credits_used`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserSchema;

impl UserSchema {
    fn defaults() -> Map<String, Value> {
        object(json!({
            "language": "en",
            "banned": false,
            "usage": {
                "credits_used": 0,
                "history": []
            },
            "plan": {
                "grants": [],
                "total": 0,
                "active": false
            }
        }))
    }
}

impl EntitySchema for UserSchema {
    fn template(&self, id: &str) -> Entity {
        let mut entity = Entity::new(id);
        entity.fields = Self::defaults();
        entity.set("created_at", now_millis());
        entity
    }

    fn process(&self, raw: &Entity) -> Option<Entity> {
        let mut entity = raw.clone();
        entity.backfill(&Self::defaults());
        if entity.get("created_at").is_none() {
            entity.set("created_at", now_millis());
        }

        let total: f64 = entity
            .get_path(&["plan", "grants"])
            .and_then(Value::as_array)
            .map(|grants| {
                grants
                    .iter()
                    .filter_map(|g| g.get("amount").and_then(Value::as_f64))
                    .sum()
            })
            .unwrap_or(0.0);
        let used = entity
            .get_path(&["usage", "credits_used"])
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        if let Some(Value::Object(plan)) = entity.fields.get_mut("plan") {
            plan.insert("total".into(), json!(total));
            plan.insert("active".into(), json!(total > used));
        }
        Some(entity)
    }
}

// ── tenants ──────────────────────────────────────────────────────────

/// Tenant records: per-tenant settings and moderation configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantSchema;

impl TenantSchema {
    fn defaults() -> Map<String, Value> {
        object(json!({
            "settings": {
                "language": "en",
                "moderation": {
                    "enabled": false,
                    "strikes_before_ban": 3
                }
            },
            "members": []
        }))
    }
}

impl EntitySchema for TenantSchema {
    fn template(&self, id: &str) -> Entity {
        let mut entity = Entity::new(id);
        entity.fields = Self::defaults();
        entity.set("created_at", now_millis());
        entity
    }

    fn process(&self, raw: &Entity) -> Option<Entity> {
        let mut entity = raw.clone();
        entity.backfill(&Self::defaults());
        Some(entity)
    }
}

// ── metrics ──────────────────────────────────────────────────────────

/// Usage metric records. Rows already in shape are used unmodified.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSchema;

impl EntitySchema for MetricsSchema {
    fn template(&self, id: &str) -> Entity {
        Entity::new(id)
            .with_field("created_at", now_millis())
            .with_field("counters", json!({}))
            .with_field("daily", json!({}))
    }

    fn process(&self, raw: &Entity) -> Option<Entity> {
        let mut entity = raw.clone();
        let defaults = object(json!({"counters": {}, "daily": {}}));
        entity.backfill(&defaults).then_some(entity)
    }
}

// ── configured collections ───────────────────────────────────────────

/// Schema for collections declared in configuration: a static template
/// whose fields are back-filled into every row.
#[derive(Debug, Clone, Default)]
pub struct DefaultsSchema {
    defaults: Map<String, Value>,
}

impl DefaultsSchema {
    /// Build from a JSON object of default fields.
    pub fn new(defaults: Map<String, Value>) -> Self {
        Self { defaults }
    }

    /// Build from any JSON value; non-objects yield an empty template.
    pub fn from_value(value: Value) -> Self {
        Self::new(object(value))
    }
}

impl EntitySchema for DefaultsSchema {
    fn template(&self, id: &str) -> Entity {
        let mut entity = Entity::new(id);
        entity.backfill(&self.defaults);
        entity
    }

    fn process(&self, raw: &Entity) -> Option<Entity> {
        let mut entity = raw.clone();
        entity.backfill(&self.defaults).then_some(entity)
    }
}

// ── tests ────────────────────────────────────────────────────────────
