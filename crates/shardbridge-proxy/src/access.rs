//! The data API shared by the authority and its proxies.
//!
//! Code that only reads and writes entities can be written once against
//! [`EntityAccess`] and run in either process.

use async_trait::async_trait;
use serde_json::{Map, Value};
use shardbridge_store::{AuthorityDataManager, Entity, EntityRef, StoreError};

use crate::error::ProxyError;
use crate::proxy::ProxyDataManager;

/// Entity operations available in every process.
#[async_trait]
pub trait EntityAccess: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn fetch(&self, collection: &str, target: EntityRef)
    -> Result<Option<Entity>, Self::Error>;

    async fn fetch_or_create(
        &self,
        collection: &str,
        target: EntityRef,
    ) -> Result<Entity, Self::Error>;

    async fn update(
        &self,
        collection: &str,
        target: EntityRef,
        patch: &Map<String, Value>,
    ) -> Result<Entity, Self::Error>;

    async fn remove(&self, collection: &str, target: EntityRef) -> Result<(), Self::Error>;
}

#[async_trait]
impl EntityAccess for AuthorityDataManager {
    type Error = StoreError;

    async fn fetch(&self, collection: &str, target: EntityRef) -> Result<Option<Entity>, StoreError> {
        AuthorityDataManager::fetch(self, collection, target).await
    }

    async fn fetch_or_create(&self, collection: &str, target: EntityRef) -> Result<Entity, StoreError> {
        AuthorityDataManager::fetch_or_create(self, collection, target).await
    }

    async fn update(
        &self,
        collection: &str,
        target: EntityRef,
        patch: &Map<String, Value>,
    ) -> Result<Entity, StoreError> {
        AuthorityDataManager::update(self, collection, target, patch).await
    }

    async fn remove(&self, collection: &str, target: EntityRef) -> Result<(), StoreError> {
        AuthorityDataManager::remove(self, collection, target).await
    }
}

#[async_trait]
impl EntityAccess for ProxyDataManager {
    type Error = ProxyError;

    async fn fetch(&self, collection: &str, target: EntityRef) -> Result<Option<Entity>, ProxyError> {
        ProxyDataManager::fetch(self, collection, target).await
    }

    async fn fetch_or_create(&self, collection: &str, target: EntityRef) -> Result<Entity, ProxyError> {
        ProxyDataManager::fetch_or_create(self, collection, target).await
    }

    async fn update(
        &self,
        collection: &str,
        target: EntityRef,
        patch: &Map<String, Value>,
    ) -> Result<Entity, ProxyError> {
        ProxyDataManager::update(self, collection, target, patch).await
    }

    async fn remove(&self, collection: &str, target: EntityRef) -> Result<(), ProxyError> {
        ProxyDataManager::remove(self, collection, target).await
    }
}
