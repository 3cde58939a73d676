//! Amazon S3 blob store.
//!
//! Containers become key prefixes inside a single bucket.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::debug;

use super::{content_digest, validate_blob_name, BlobError, BlobStore, Result, StoredBlob};

pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    /// Create a store using default credentials from the environment.
    pub async fn new(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::with_client(Client::new(&config), bucket)
    }

    /// Create with custom endpoint (for S3-compatible services like MinIO).
    pub async fn with_endpoint(
        bucket: impl Into<String>,
        endpoint: &str,
        region: Option<&str>,
    ) -> Self {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = region {
            config_loader = config_loader.region(aws_config::Region::new(region.to_string()));
        }

        let config = config_loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .endpoint_url(endpoint)
            .force_path_style(true) // Required for MinIO and most S3-compatible services
            .build();

        Self::with_client(Client::from_conf(s3_config), bucket)
    }

    pub fn with_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    fn object_key(container: &str, blob_name: &str) -> Result<String> {
        validate_blob_name(container)?;
        validate_blob_name(blob_name)?;
        Ok(format!("{}/{}", container, blob_name))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(BlobError::StoreFailed(format!("S3 head failed: {}", e))),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn put(
        &self,
        container: &str,
        blob_name: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<StoredBlob> {
        let key = Self::object_key(container, blob_name)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| BlobError::StoreFailed(format!("S3 upload failed: {}", e)))?;

        debug!(bucket = %self.bucket, key = %key, size = data.len(), "Stored blob in S3");

        Ok(StoredBlob {
            container: container.to_string(),
            blob_name: blob_name.to_string(),
            size: data.len() as u64,
            sha256: content_digest(data),
        })
    }

    async fn get(&self, container: &str, blob_name: &str) -> Result<Vec<u8>> {
        let key = Self::object_key(container, blob_name)?;

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    BlobError::NotFound(key.clone())
                } else {
                    BlobError::StoreFailed(format!("S3 download failed: {}", e))
                }
            })?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| BlobError::StoreFailed(format!("S3 body read failed: {}", e)))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn delete(&self, container: &str, blob_name: &str) -> Result<bool> {
        let key = Self::object_key(container, blob_name)?;

        // S3 deletes succeed for missing keys, so check first.
        if !self.exists(&key).await? {
            return Ok(false);
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| BlobError::StoreFailed(format!("S3 delete failed: {}", e)))?;

        debug!(bucket = %self.bucket, key = %key, "Deleted blob from S3");
        Ok(true)
    }
}
