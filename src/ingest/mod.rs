//! Upload-to-job pipeline.
//!
//! An accepted upload is stored as a blob, given a signed read URL and
//! described by an [`IngestionJob`] on the durable queue. The relay never
//! tracks the job after the queue accepts it.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::blob::{BlobError, BlobStore};

pub mod access;
pub mod job;
pub mod queue;
#[cfg(feature = "sqs")]
pub mod sqs;

pub use access::{
    AccessClass, AccessConfig, AccessError, AccessSigner, Category, Containers,
    SignedAccessDescriptor,
};
pub use job::{IngestRequest, IngestionJob, JobMetadata, JobValidationError, SourceType};
pub use queue::{
    decode_job, encode_job, init_job_queue, EnqueueReceipt, JobQueue, MemoryJobQueue, QueueConfig,
    QueueError, QueueType,
};
#[cfg(feature = "sqs")]
pub use sqs::SqsJobQueue;

/// Status reported for a job the queue accepted.
pub const STATUS_QUEUED: &str = "queued";

/// Errors from the ingestion pipeline.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] JobValidationError),

    #[error("Blob upload failed: {0}")]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// A file received at the upload boundary.
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub original_name: String,
    pub mime_type: String,
}

impl Upload {
    pub fn new(
        bytes: impl Into<Vec<u8>>,
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            original_name: original_name.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Extension of the original name, `bin` when there is none.
    fn extension(&self) -> &str {
        Path::new(&self.original_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("bin")
    }
}

/// Result of storing an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedBlob {
    pub blob_name: String,
    pub container: String,
    pub category: Category,
    pub access_class: AccessClass,
    pub size: u64,
    /// Public URL, or a signed URL for private blobs.
    pub access: SignedAccessDescriptor,
}

/// What the caller gets back once a job is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    pub job_id: Uuid,
    pub blob_name: String,
    pub message_id: String,
    pub status: &'static str,
}

/// Blob upload, signed access and job enqueue.
#[derive(Clone)]
pub struct IngestionPipeline {
    blobs: Arc<dyn BlobStore>,
    signer: AccessSigner,
    queue: Arc<dyn JobQueue>,
}

impl IngestionPipeline {
    pub fn new(blobs: Arc<dyn BlobStore>, signer: AccessSigner, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            blobs,
            signer,
            queue,
        }
    }

    pub fn signer(&self) -> &AccessSigner {
        &self.signer
    }

    /// Issue access for an existing blob under the policy of `category`.
    pub fn issue_signed_access(
        &self,
        blob_name: &str,
        category: Category,
    ) -> Result<SignedAccessDescriptor, AccessError> {
        self.signer.issue(blob_name, category)
    }

    /// Store `upload` as `<category>/<uuid>.<ext>` in the container the
    /// category routes to.
    pub async fn upload(&self, upload: &Upload, category: Category) -> Result<UploadedBlob, IngestError> {
        let blob_name = format!("{}/{}.{}", category.tag(), Uuid::new_v4(), upload.extension());
        let container = self.signer.containers().for_category(category).to_string();

        let stored = self
            .blobs
            .put(&container, &blob_name, &upload.bytes, &upload.mime_type)
            .await?;
        let access = self.signer.issue(&blob_name, category)?;

        info!(
            blob_name = %blob_name,
            container = %container,
            category = %category,
            size = stored.size,
            "Blob uploaded"
        );

        Ok(UploadedBlob {
            blob_name,
            container,
            category,
            access_class: category.access_class(),
            size: stored.size,
            access,
        })
    }

    /// Check the job contract, then hand the job to the queue.
    pub async fn enqueue(&self, job: &IngestionJob) -> Result<EnqueueReceipt, IngestError> {
        if let Err(e) = job.validate() {
            warn!(job_id = %job.job_id, error = %e, "Rejected ingestion job");
            return Err(e.into());
        }

        let receipt = self.queue.enqueue(job).await.map_err(|e| {
            error!(job_id = %job.job_id, queue = self.queue.name(), error = %e, "Failed to queue ingestion job");
            e
        })?;

        info!(
            job_id = %job.job_id,
            message_id = %receipt.message_id,
            source_type = %job.metadata.source_type,
            "Ingestion job queued"
        );
        Ok(receipt)
    }

    /// Validate the request, store the upload, sign it and queue the job.
    ///
    /// Validation runs first so rejected requests leave no blob behind.
    pub async fn submit(
        &self,
        upload: Upload,
        request: IngestRequest,
    ) -> Result<IngestReceipt, IngestError> {
        let category = request
            .category
            .as_deref()
            .map(Category::from_tag)
            .unwrap_or(Category::Default);
        let metadata = request.into_metadata(Some(upload.original_name.clone()))?;

        let uploaded = self.upload(&upload, category).await?;
        let job = IngestionJob::new(uploaded.access.url.clone(), metadata)?;
        let receipt = self.enqueue(&job).await?;

        Ok(IngestReceipt {
            job_id: job.job_id,
            blob_name: uploaded.blob_name,
            message_id: receipt.message_id,
            status: STATUS_QUEUED,
        })
    }
}
