//! Filesystem blob storage.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{content_digest, validate_blob_name, BlobError, BlobStore, Result, StoredBlob};

/// Stores blobs as files under `{base_path}/{container}/`.
pub struct FilesystemBlobStore {
    base_path: PathBuf,
}

impl FilesystemBlobStore {
    /// Create the store, creating the base directory if needed.
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    fn path_for(&self, container: &str, blob_name: &str) -> Result<PathBuf> {
        validate_blob_name(container)?;
        validate_blob_name(blob_name)?;
        Ok(self.base_path.join(container).join(blob_name))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn put(
        &self,
        container: &str,
        blob_name: &str,
        data: &[u8],
        _content_type: &str,
    ) -> Result<StoredBlob> {
        let path = self.path_for(container, blob_name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write atomically using temp file + rename
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, data).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(container = %container, blob_name = %blob_name, size = data.len(), "Stored blob");

        Ok(StoredBlob {
            container: container.to_string(),
            blob_name: blob_name.to_string(),
            size: data.len() as u64,
            sha256: content_digest(data),
        })
    }

    async fn get(&self, container: &str, blob_name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(container, blob_name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BlobError::NotFound(format!("{container}/{blob_name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, container: &str, blob_name: &str) -> Result<bool> {
        let path = self.path_for(container, blob_name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(container = %container, blob_name = %blob_name, "Deleted blob");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_temp_store() -> (FilesystemBlobStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemBlobStore::new(temp_dir.path()).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, temp) = create_temp_store().await;

        let stored = store
            .put("private", "video/abc.mp4", b"frames", "video/mp4")
            .await
            .unwrap();

        assert_eq!(stored.size, 6);
        assert!(temp.path().join("private/video/abc.mp4").exists());
        assert_eq!(store.get("private", "video/abc.mp4").await.unwrap(), b"frames");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (store, _temp) = create_temp_store().await;
        let err = store.get("private", "video/none.mp4").await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let (store, _temp) = create_temp_store().await;
        store
            .put("public", "thumbnail/t.png", b"png", "image/png")
            .await
            .unwrap();

        assert!(store.delete("public", "thumbnail/t.png").await.unwrap());
        assert!(!store.delete("public", "thumbnail/t.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let (store, _temp) = create_temp_store().await;
        let err = store
            .put("private", "../escape.txt", b"x", "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::InvalidName(_)));
    }
}
