//! Worker-side Proxy Data Manager.
//!
//! Mirrors the authority's data API. Each method is one typed call through
//! the RPC bridge; the authority runs it against the real cache and store
//! and sends the result back.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use shardbridge_kernel::{LocalHub, RpcClient, RpcConfig, connect_tcp};
use shardbridge_store::{AuthorityStats, Entity, EntityRef, FlushReport};
use tokio::net::ToSocketAddrs;
use tracing::debug;

use crate::commands::{
    FETCH, FETCH_OR_CREATE, FLUSH, NoArgs, REMOVE, STATS, TargetArgs, UPDATE, UpdateArgs,
};
use crate::error::ProxyResult;

/// Data API for worker processes.
#[derive(Clone)]
pub struct ProxyDataManager {
    client: RpcClient,
}

impl ProxyDataManager {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }

    /// Attach to an authority running in this process.
    pub fn local(hub: &LocalHub, config: &RpcConfig) -> Self {
        Self::new(RpcClient::new(hub.connect(), config))
    }

    /// Connect to an authority over TCP.
    pub async fn connect(addr: impl ToSocketAddrs, config: &RpcConfig) -> ProxyResult<Self> {
        let channel = connect_tcp(addr, config.channel_capacity).await?;
        Ok(Self::new(RpcClient::new(channel, config)))
    }

    pub async fn fetch(
        &self,
        collection: &str,
        target: impl Into<EntityRef>,
    ) -> ProxyResult<Option<Entity>> {
        self.call(FETCH, &target_args(collection, target)).await
    }

    pub async fn fetch_or_create(
        &self,
        collection: &str,
        target: impl Into<EntityRef>,
    ) -> ProxyResult<Entity> {
        self.call(FETCH_OR_CREATE, &target_args(collection, target))
            .await
    }

    pub async fn update(
        &self,
        collection: &str,
        target: impl Into<EntityRef>,
        patch: &Map<String, Value>,
    ) -> ProxyResult<Entity> {
        let args = UpdateArgs {
            collection: collection.to_string(),
            target: target.into(),
            patch: patch.clone(),
        };
        self.call(UPDATE, &args).await
    }

    pub async fn remove(&self, collection: &str, target: impl Into<EntityRef>) -> ProxyResult<()> {
        self.call(REMOVE, &target_args(collection, target)).await
    }

    /// Ask the authority to flush its write queue now.
    pub async fn flush(&self) -> ProxyResult<FlushReport> {
        self.call(FLUSH, &NoArgs::default()).await
    }

    pub async fn stats(&self) -> ProxyResult<AuthorityStats> {
        self.call(STATS, &NoArgs::default()).await
    }

    /// The underlying RPC client.
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    async fn call<A, R>(&self, command: &str, args: &A) -> ProxyResult<R>
    where
        A: Serialize + Sync,
        R: DeserializeOwned,
    {
        debug!(command, "proxying call to authority");
        Ok(self.client.call(command, args).await?)
    }
}

fn target_args(collection: &str, target: impl Into<EntityRef>) -> TargetArgs {
    TargetArgs {
        collection: collection.to_string(),
        target: target.into(),
    }
}
