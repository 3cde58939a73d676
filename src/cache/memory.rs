//! In-memory cache.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheError, CacheStore, Result};

#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
    fail_on_delete: RwLock<bool>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deletes fail, to exercise error isolation.
    pub async fn set_fail_on_delete(&self, fail: bool) {
        *self.fail_on_delete.write().await = fail;
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        if *self.fail_on_delete.read().await {
            return Err(CacheError::Command("simulated delete failure".to_string()));
        }
        Ok(self.entries.write().await.remove(key).is_some())
    }
}
