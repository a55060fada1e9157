//! Worker subcommands: one proxied call each, result printed as JSON.

use anyhow::{Result, anyhow, bail};
use serde::Serialize;
use serde_json::{Map, Value, json};
use shardbridge_proxy::{ProxyDataManager, ProxyError};

use crate::cli::Commands;
use crate::config::BridgeConfig;

pub async fn run(config: &BridgeConfig, command: Commands) -> Result<()> {
    let addr = config.rpc.listen.as_str();
    let proxy = ProxyDataManager::connect(addr, &config.rpc_config())
        .await
        .map_err(|e| anyhow!("cannot reach authority at {addr}: {e}"))?;

    let output = match command {
        Commands::Fetch { collection, id } => {
            to_json(proxy.fetch(&collection, id).await.map_err(user_error)?)?
        }
        Commands::FetchOrCreate { collection, id } => {
            to_json(proxy.fetch_or_create(&collection, id).await.map_err(user_error)?)?
        }
        Commands::Update {
            collection,
            id,
            patch,
        } => {
            let patch = parse_patch(&patch)?;
            to_json(proxy.update(&collection, id, &patch).await.map_err(user_error)?)?
        }
        Commands::Remove { collection, id } => {
            proxy.remove(&collection, id.as_str()).await.map_err(user_error)?;
            json!({ "removed": { "collection": collection, "id": id } })
        }
        Commands::Flush => to_json(proxy.flush().await.map_err(user_error)?)?,
        Commands::Stats => to_json(proxy.stats().await.map_err(user_error)?)?,
        Commands::Serve { .. } => bail!("`serve` is not a worker command"),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Parse a patch argument, which must be a JSON object.
pub fn parse_patch(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => bail!("patch must be a JSON object, got {other}"),
    }
}

/// Transient failures read as "try again"; the rest keep their detail.
fn user_error(err: ProxyError) -> anyhow::Error {
    if err.is_retryable() {
        anyhow!("{err} (temporary failure, try again)")
    } else {
        anyhow::Error::new(err)
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_must_be_an_object() {
        let patch = parse_patch(r#"{"language":"pt","usage":{"credits_used":2}}"#).unwrap();
        assert_eq!(patch.get("language"), Some(&json!("pt")));

        assert!(parse_patch("[1,2]").is_err());
        assert!(parse_patch("not json").is_err());
    }

    #[test]
    fn retryable_errors_say_try_again() {
        let err = user_error(ProxyError::Transport("connection reset".into()));
        assert!(err.to_string().contains("try again"));

        let err = user_error(ProxyError::Remote {
            kind: "schema_not_found".into(),
            message: "no schema registered for collection `widgets`".into(),
        });
        assert!(!err.to_string().contains("try again"));
    }
}
