//! Durable queue the processing workers pull jobs from.
//!
//! Messages are the job's JSON, base64-encoded. Each backend creates its
//! queue on first use, once per process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use super::job::IngestionJob;

/// Errors from the job queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job queue not configured: {0}")]
    NotConfigured(String),

    #[error("Failed to send job: {0}")]
    SendFailed(String),

    #[error("Failed to encode job: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to decode job message: {0}")]
    Decode(String),
}

/// Broker acknowledgement of an accepted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueReceipt {
    pub message_id: String,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    fn name(&self) -> &'static str;

    async fn enqueue(&self, job: &IngestionJob) -> Result<EnqueueReceipt, QueueError>;
}

/// Encode a job as a queue message body.
pub fn encode_job(job: &IngestionJob) -> Result<String, QueueError> {
    Ok(STANDARD.encode(serde_json::to_vec(job)?))
}

/// Decode a queue message body produced by [`encode_job`].
pub fn decode_job(body: &str) -> Result<IngestionJob, QueueError> {
    let bytes = STANDARD
        .decode(body)
        .map_err(|e| QueueError::Decode(format!("message is not base64: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| QueueError::Decode(format!("message is not a job: {e}")))
}

/// Queue backend discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    #[default]
    Memory,
    Sqs,
}

/// Job queue configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    #[serde(rename = "type")]
    pub queue_type: QueueType,
    pub queue_name: String,
    /// Custom endpoint for SQS-compatible services.
    pub endpoint: Option<String>,
    pub region: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_type: QueueType::Memory,
            queue_name: "ingestion-jobs".to_string(),
            endpoint: None,
            region: None,
        }
    }
}

/// Initialize the configured job queue. `None` yields a queue that rejects
/// every job with [`QueueError::NotConfigured`].
pub async fn init_job_queue(config: Option<&QueueConfig>) -> Result<Arc<dyn JobQueue>, QueueError> {
    let Some(config) = config else {
        info!("No job queue configured");
        return Ok(Arc::new(UnconfiguredJobQueue));
    };

    match config.queue_type {
        QueueType::Memory => {
            info!(queue_type = "memory", queue = %config.queue_name, "Job queue initialized");
            Ok(Arc::new(MemoryJobQueue::new(&config.queue_name)))
        }
        QueueType::Sqs => {
            #[cfg(feature = "sqs")]
            {
                let queue = super::sqs::SqsJobQueue::new(config).await;
                info!(queue_type = "sqs", queue = %config.queue_name, "Job queue initialized");
                Ok(Arc::new(queue))
            }

            #[cfg(not(feature = "sqs"))]
            {
                Err(QueueError::NotConfigured(
                    "SQS support requires the 'sqs' feature. Rebuild with --features sqs"
                        .to_string(),
                ))
            }
        }
    }
}

/// Rejects every job.
pub struct UnconfiguredJobQueue;

#[async_trait]
impl JobQueue for UnconfiguredJobQueue {
    fn name(&self) -> &'static str {
        "unconfigured"
    }

    async fn enqueue(&self, _job: &IngestionJob) -> Result<EnqueueReceipt, QueueError> {
        Err(QueueError::NotConfigured("no job queue endpoint".to_string()))
    }
}

/// In-process queue keeping encoded messages.
#[derive(Default)]
pub struct MemoryJobQueue {
    queue_name: String,
    created: OnceCell<()>,
    create_calls: AtomicUsize,
    messages: RwLock<Vec<(String, String)>>,
    fail_on_send: RwLock<bool>,
}

impl MemoryJobQueue {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Default::default()
        }
    }

    pub async fn set_fail_on_send(&self, fail: bool) {
        *self.fail_on_send.write().await = fail;
    }

    /// How many times the queue was created.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Encoded message bodies, oldest first.
    pub async fn messages(&self) -> Vec<String> {
        self.messages
            .read()
            .await
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }

    /// Decoded jobs, oldest first.
    pub async fn jobs(&self) -> Vec<IngestionJob> {
        self.messages
            .read()
            .await
            .iter()
            .filter_map(|(_, body)| decode_job(body).ok())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn enqueue(&self, job: &IngestionJob) -> Result<EnqueueReceipt, QueueError> {
        self.created
            .get_or_init(|| async {
                self.create_calls.fetch_add(1, Ordering::SeqCst);
                info!(queue = %self.queue_name, "Job queue created");
            })
            .await;

        if *self.fail_on_send.read().await {
            return Err(QueueError::SendFailed("simulated queue outage".to_string()));
        }

        let body = encode_job(job)?;
        let message_id = Uuid::new_v4().to_string();
        self.messages.write().await.push((message_id.clone(), body));

        debug!(job_id = %job.job_id, message_id = %message_id, "Job enqueued");
        Ok(EnqueueReceipt { message_id })
    }
}
