//! Blob storage for uploaded course material.
//!
//! Blobs live in one of two containers: a public one served without
//! signatures and a private one reachable only through signed URLs. Names
//! follow `<category>/<uuid>.<ext>`.
//!
//! Layout per backend:
//! ```text
//! filesystem: {base_path}/{container}/{blob_name}
//! s3:         s3://{bucket}/{container}/{blob_name}
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::info;

pub mod filesystem;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

pub use filesystem::FilesystemBlobStore;
pub use memory::MemoryBlobStore;
#[cfg(feature = "s3")]
pub use s3::S3BlobStore;

/// Result type for blob operations.
pub type Result<T> = std::result::Result<T, BlobError>;

/// Errors from blob storage.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid blob name: {0}")]
    InvalidName(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Blob store failed: {0}")]
    StoreFailed(String),

    #[error("Blob store not configured: {0}")]
    NotConfigured(String),
}

/// Metadata of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub container: String,
    pub blob_name: String,
    pub size: u64,
    /// Hex SHA-256 of the content.
    pub sha256: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn put(
        &self,
        container: &str,
        blob_name: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<StoredBlob>;

    async fn get(&self, container: &str, blob_name: &str) -> Result<Vec<u8>>;

    /// Delete a blob. Returns whether it existed.
    async fn delete(&self, container: &str, blob_name: &str) -> Result<bool>;
}

/// Hex SHA-256 digest.
pub fn content_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Reject names that could escape their container.
pub fn validate_blob_name(blob_name: &str) -> Result<()> {
    let invalid = blob_name.is_empty()
        || blob_name.starts_with('/')
        || blob_name.contains('\\')
        || blob_name.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if invalid {
        return Err(BlobError::InvalidName(blob_name.to_string()));
    }
    Ok(())
}

/// Blob backend discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobType {
    #[default]
    Filesystem,
    /// Process memory only; nothing survives a restart.
    Memory,
    S3,
}

/// Blob storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    #[serde(rename = "type")]
    pub blob_type: BlobType,
    /// Root directory for the filesystem backend.
    pub base_path: String,
    /// Bucket for the S3 backend.
    pub bucket: String,
    /// Custom endpoint for S3-compatible services.
    pub endpoint: Option<String>,
    pub region: Option<String>,
    /// Container for publicly readable blobs.
    pub public_container: String,
    /// Container for blobs served through signed URLs.
    pub private_container: String,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            blob_type: BlobType::Filesystem,
            base_path: "./data/blobs".to_string(),
            bucket: "shiksha-content".to_string(),
            endpoint: None,
            region: None,
            public_container: "public".to_string(),
            private_container: "private".to_string(),
        }
    }
}

/// Initialize the configured blob store.
pub async fn init_blob_store(config: &BlobConfig) -> Result<Arc<dyn BlobStore>> {
    match config.blob_type {
        BlobType::Filesystem => {
            let store = FilesystemBlobStore::new(&config.base_path).await?;
            info!(blob_type = "filesystem", base_path = %config.base_path, "Blob store initialized");
            Ok(Arc::new(store))
        }
        BlobType::Memory => {
            info!(blob_type = "memory", "Blob store initialized");
            Ok(Arc::new(MemoryBlobStore::new()))
        }
        BlobType::S3 => {
            #[cfg(feature = "s3")]
            {
                let store = match &config.endpoint {
                    Some(endpoint) => {
                        S3BlobStore::with_endpoint(&config.bucket, endpoint, config.region.as_deref())
                            .await
                    }
                    None => S3BlobStore::new(&config.bucket).await,
                };
                info!(blob_type = "s3", bucket = %config.bucket, "Blob store initialized");
                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "s3"))]
            {
                Err(BlobError::NotConfigured(
                    "S3 support requires the 's3' feature. Rebuild with --features s3".to_string(),
                ))
            }
        }
    }
}
