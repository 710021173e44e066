//! In-memory storage backend

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::backend::{CacheStorage, validate_cache_name};
use crate::entry::{CachedResponse, RequestKey};
use crate::error::StorageError;

type Cache = HashMap<RequestKey, CachedResponse>;

/// In-memory storage backend
///
/// Contents are lost when the process exits. Useful for ephemeral
/// deployments and tests.
#[derive(Default)]
pub struct MemoryStorage {
    caches: RwLock<BTreeMap<String, Cache>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, cache: &str) -> Result<bool, StorageError> {
        validate_cache_name(cache)?;

        let mut caches = self.caches.write();
        if caches.contains_key(cache) {
            return Ok(false);
        }

        debug!("Creating in-memory cache {}", cache);
        caches.insert(cache.to_string(), Cache::new());
        Ok(true)
    }

    async fn has(&self, cache: &str) -> Result<bool, StorageError> {
        Ok(self.caches.read().contains_key(cache))
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.caches.read().keys().cloned().collect())
    }

    async fn delete(&self, cache: &str) -> Result<bool, StorageError> {
        debug!("Deleting in-memory cache {}", cache);
        Ok(self.caches.write().remove(cache).is_some())
    }

    async fn get(
        &self,
        cache: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, StorageError> {
        Ok(self
            .caches
            .read()
            .get(cache)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(
        &self,
        cache: &str,
        key: &RequestKey,
        response: CachedResponse,
    ) -> Result<(), StorageError> {
        let mut caches = self.caches.write();
        let entries = caches
            .get_mut(cache)
            .ok_or_else(|| StorageError::CacheNotFound(cache.to_string()))?;
        entries.insert(key.clone(), response);
        Ok(())
    }

    async fn entries(&self, cache: &str) -> Result<Vec<RequestKey>, StorageError> {
        let caches = self.caches.read();
        let entries = caches
            .get(cache)
            .ok_or_else(|| StorageError::CacheNotFound(cache.to_string()))?;

        let mut keys: Vec<RequestKey> = entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
