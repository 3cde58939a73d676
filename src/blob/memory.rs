//! In-memory blob store for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{content_digest, validate_blob_name, BlobError, BlobStore, Result, StoredBlob};

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<(String, String), Vec<u8>>>,
    fail_on_put: RwLock<bool>,
    fail_on_delete: RwLock<bool>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_put(&self, fail: bool) {
        *self.fail_on_put.write().await = fail;
    }

    pub async fn set_fail_on_delete(&self, fail: bool) {
        *self.fail_on_delete.write().await = fail;
    }

    pub async fn contains(&self, container: &str, blob_name: &str) -> bool {
        self.blobs
            .read()
            .await
            .contains_key(&(container.to_string(), blob_name.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(
        &self,
        container: &str,
        blob_name: &str,
        data: &[u8],
        _content_type: &str,
    ) -> Result<StoredBlob> {
        validate_blob_name(blob_name)?;
        if *self.fail_on_put.read().await {
            return Err(BlobError::StoreFailed("simulated upload failure".to_string()));
        }
        self.blobs
            .write()
            .await
            .insert((container.to_string(), blob_name.to_string()), data.to_vec());
        Ok(StoredBlob {
            container: container.to_string(),
            blob_name: blob_name.to_string(),
            size: data.len() as u64,
            sha256: content_digest(data),
        })
    }

    async fn get(&self, container: &str, blob_name: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(&(container.to_string(), blob_name.to_string()))
            .cloned()
            .ok_or_else(|| BlobError::NotFound(format!("{container}/{blob_name}")))
    }

    async fn delete(&self, container: &str, blob_name: &str) -> Result<bool> {
        if *self.fail_on_delete.read().await {
            return Err(BlobError::StoreFailed("simulated delete failure".to_string()));
        }
        Ok(self
            .blobs
            .write()
            .await
            .remove(&(container.to_string(), blob_name.to_string()))
            .is_some())
    }
}
