//! Process configuration.
//!
//! Reads `config/shardbridge.toml` (or the file given with `--config`),
//! falls back to defaults for anything missing, then applies
//! `SHARDBRIDGE_*` environment overrides.
//!
//! ```toml
//! [store]
//! db_path = "data/shardbridge.db"
//! cache_ttl_secs = 1800
//! flush_interval_ms = 5000
//!
//! [rpc]
//! listen = "127.0.0.1:7420"
//! timeout_secs = 45
//!
//! # Extra collections, each with its default fields.
//! [collections.guilds]
//! prefix = "!"
//! features = { music = false }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shardbridge_kernel::RpcConfig;
use shardbridge_store::{AuthorityConfig, DefaultsSchema, SchemaRegistry};
use tracing::{info, warn};

use crate::helpers::parse_env;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config/shardbridge.toml";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub store: StoreSection,
    pub rpc: RpcSection,
    /// Collections beyond the built-in ones, keyed by name.
    pub collections: BTreeMap<String, Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub db_path: PathBuf,
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
    pub flush_interval_ms: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        let authority = AuthorityConfig::default();
        Self {
            db_path: PathBuf::from("data/shardbridge.db"),
            cache_ttl_secs: authority.cache_ttl.as_secs(),
            cache_capacity: authority.cache_capacity,
            flush_interval_ms: authority.flush_interval.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    /// Address the authority listens on and workers connect to.
    pub listen: String,
    pub timeout_secs: u64,
    pub channel_capacity: usize,
}

impl Default for RpcSection {
    fn default() -> Self {
        let rpc = RpcConfig::default();
        Self {
            listen: "127.0.0.1:7420".to_string(),
            timeout_secs: rpc.timeout.as_secs(),
            channel_capacity: rpc.channel_capacity,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl BridgeConfig {
    /// Load the config file and apply process environment overrides.
    ///
    /// An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `SHARDBRIDGE_*` overrides looked up through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &'static str| (key, lookup(key));

        let (key, raw) = var("SHARDBRIDGE_DB_PATH");
        if let Some(path) = parse_env::<PathBuf>(key, raw)? {
            self.store.db_path = path;
        }
        let (_, raw) = var("SHARDBRIDGE_LISTEN");
        if let Some(listen) = raw.filter(|v| !v.trim().is_empty()) {
            self.rpc.listen = listen.trim().to_string();
        }
        let (key, raw) = var("SHARDBRIDGE_RPC_TIMEOUT_SECS");
        if let Some(secs) = parse_env(key, raw)? {
            self.rpc.timeout_secs = secs;
        }
        let (key, raw) = var("SHARDBRIDGE_FLUSH_INTERVAL_MS");
        if let Some(ms) = parse_env(key, raw)? {
            self.store.flush_interval_ms = ms;
        }
        let (key, raw) = var("SHARDBRIDGE_CACHE_TTL_SECS");
        if let Some(secs) = parse_env(key, raw)? {
            self.store.cache_ttl_secs = secs;
        }
        Ok(())
    }

    // ── derived settings ─────────────────────────────────────────────

    pub fn authority_config(&self) -> AuthorityConfig {
        AuthorityConfig::new()
            .with_cache_ttl(Duration::from_secs(self.store.cache_ttl_secs))
            .with_cache_capacity(self.store.cache_capacity)
            .with_flush_interval(Duration::from_millis(self.store.flush_interval_ms.max(1)))
    }

    pub fn rpc_config(&self) -> RpcConfig {
        RpcConfig::default()
            .with_timeout(Duration::from_secs(self.rpc.timeout_secs.max(1)))
            .with_channel_capacity(self.rpc.channel_capacity)
    }

    /// Built-in schemas plus one defaults schema per configured collection.
    ///
    /// A configured collection never replaces a built-in one.
    pub fn schema_registry(&self) -> SchemaRegistry {
        let mut registry = SchemaRegistry::with_builtins();
        for (name, defaults) in &self.collections {
            if registry.contains(name) {
                warn!(collection = %name, "ignoring config for built-in collection");
                continue;
            }
            registry.register(name.clone(), DefaultsSchema::new(defaults.clone()));
        }
        registry
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
[store]
db_path = "/var/lib/shardbridge/main.db"
flush_interval_ms = 250

[rpc]
listen = "0.0.0.0:9000"

[collections.guilds]
prefix = "!"
features = { music = false }

[collections.users]
language = "xx"
"#;

    #[test]
    fn empty_file_gives_defaults() {
        let config = BridgeConfig::parse("").unwrap();
        assert_eq!(config.store.db_path, PathBuf::from("data/shardbridge.db"));
        assert_eq!(config.rpc.timeout_secs, 45);
        assert_eq!(config.authority_config().flush_interval, Duration::from_secs(5));
        assert!(config.collections.is_empty());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = BridgeConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.store.flush_interval_ms, 250);
        assert_eq!(config.store.cache_ttl_secs, 1800);
        assert_eq!(config.rpc.listen, "0.0.0.0:9000");
        assert_eq!(config.rpc.channel_capacity, 256);
    }

    #[test]
    fn configured_collections_get_schemas() {
        let registry = BridgeConfig::parse(SAMPLE).unwrap().schema_registry();
        let guild = registry.instantiate("guilds", "g1").unwrap();
        assert_eq!(guild.get("prefix"), Some(&Value::from("!")));
        assert_eq!(guild.get_path(&["features", "music"]), Some(&Value::Bool(false)));

        // Built-ins are not overridden.
        let user = registry.instantiate("users", "u1").unwrap();
        assert_eq!(user.get("language"), Some(&Value::from("en")));
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("SHARDBRIDGE_DB_PATH", "/tmp/other.db"),
            ("SHARDBRIDGE_LISTEN", "127.0.0.1:1"),
            ("SHARDBRIDGE_RPC_TIMEOUT_SECS", "3"),
            ("SHARDBRIDGE_FLUSH_INTERVAL_MS", "100"),
            ("SHARDBRIDGE_CACHE_TTL_SECS", "60"),
        ]
        .into_iter()
        .collect();

        let mut config = BridgeConfig::parse(SAMPLE).unwrap();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.store.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.rpc.listen, "127.0.0.1:1");
        assert_eq!(config.rpc_config().timeout, Duration::from_secs(3));
        assert_eq!(config.authority_config().flush_interval, Duration::from_millis(100));
        assert_eq!(config.authority_config().cache_ttl, Duration::from_secs(60));
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let mut config = BridgeConfig::default();
        let err = config
            .apply_overrides(|key| (key == "SHARDBRIDGE_FLUSH_INTERVAL_MS").then(|| "fast".into()))
            .unwrap_err();
        assert!(err.to_string().contains("SHARDBRIDGE_FLUSH_INTERVAL_MS"));
    }

    #[test]
    fn load_reads_an_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "[rpc]\ntimeout_secs = 7\n").unwrap();

        let config = BridgeConfig::from_file(&path).unwrap();
        assert_eq!(config.rpc.timeout_secs, 7);

        assert!(BridgeConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
