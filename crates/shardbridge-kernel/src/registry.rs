//! Command registry.
//!
//! Maps each command name the authority accepts to a typed handler. Handlers
//! receive a shared handle (usually the authority itself) plus their arguments
//! already decoded from JSON; their result is encoded back to JSON by the
//! registry, so individual handlers never touch the wire format.
//!
//! Internally the registry is backed by [`DashMap`], so commands can be
//! looked up from many server tasks without a global lock.
//!
//! # Example
//!
//! ```rust
//! # use std::sync::Arc;
//! # use shardbridge_kernel::registry::CommandRegistry;
//! struct Counter;
//!
//! let registry = CommandRegistry::<Counter>::new();
//! registry.register("echo", |_: Arc<Counter>, text: String| async move { Ok(text) });
//! assert!(registry.contains("echo"));
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::protocol::RemoteError;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Boxed future returned by an erased handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, RemoteError>> + Send>>;

/// Type-erased handler: shared handle plus raw JSON arguments.
pub type Handler<H> = Arc<dyn Fn(Arc<H>, Value) -> HandlerFuture + Send + Sync>;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Concurrent command table keyed by command name.
pub struct CommandRegistry<H> {
    commands: DashMap<String, Handler<H>>,
}

impl<H: Send + Sync + 'static> CommandRegistry<H> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: DashMap::new(),
        }
    }

    /// Register `handler` under `name`, replacing any previous entry.
    ///
    /// Arguments that fail to decode into `A` are rejected with a
    /// `bad_arguments` error before the handler runs.
    pub fn register<A, R, F, Fut>(&self, name: &str, handler: F)
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Arc<H>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RemoteError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let command = name.to_string();
        let erased: Handler<H> = Arc::new(move |handle: Arc<H>, raw: Value| {
            let handler = Arc::clone(&handler);
            let command = command.clone();
            Box::pin(async move {
                let args: A = serde_json::from_value(raw).map_err(|e| {
                    RemoteError::bad_arguments(format!("invalid arguments for `{command}`: {e}"))
                })?;
                let output = handler(handle, args).await?;
                serde_json::to_value(output).map_err(|e| {
                    RemoteError::internal(format!("failed to encode `{command}` result: {e}"))
                })
            })
        });

        if self.commands.insert(name.to_string(), erased).is_some() {
            tracing::warn!(command = name, "command re-registered, replacing previous handler");
        } else {
            tracing::debug!(command = name, "command registered");
        }
    }

    /// Look up the handler for `name`.
    pub fn get(&self, name: &str) -> Option<Handler<H>> {
        self.commands.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns `true` if a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if no commands are registered.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl<H: Send + Sync + 'static> Default for CommandRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::kinds;
    use serde::Deserialize;
    use serde_json::json;

    struct Totals {
        base: i64,
    }

    #[derive(Deserialize)]
    struct AddArgs {
        value: i64,
    }

    fn registry() -> CommandRegistry<Totals> {
        let registry = CommandRegistry::new();
        registry.register("add", |totals: Arc<Totals>, args: AddArgs| async move {
            Ok(totals.base + args.value)
        });
        registry.register("fail", |_: Arc<Totals>, _: Value| async move {
            Err::<(), _>(RemoteError::new("store", "disk full"))
        });
        registry
    }

    #[tokio::test]
    async fn typed_handler_round_trip() {
        let registry = registry();
        let handler = registry.get("add").unwrap();
        let out = handler(Arc::new(Totals { base: 40 }), json!({"value": 2}))
            .await
            .unwrap();
        assert_eq!(out, json!(42));
    }

    #[tokio::test]
    async fn bad_arguments_are_rejected_before_the_handler() {
        let registry = registry();
        let handler = registry.get("add").unwrap();
        let err = handler(Arc::new(Totals { base: 0 }), json!({"value": "two"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, kinds::BAD_ARGUMENTS);
        assert!(err.message.contains("add"));
    }

    #[tokio::test]
    async fn handler_errors_pass_through() {
        let registry = registry();
        let handler = registry.get("fail").unwrap();
        let err = handler(Arc::new(Totals { base: 0 }), Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::new("store", "disk full"));
    }

    #[test]
    fn names_are_sorted() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["add", "fail"]);
        assert_eq!(registry.len(), 2);
        assert!(!registry.contains("missing"));
        assert!(registry.get("missing").is_none());
    }
}
