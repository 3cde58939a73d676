//! Amazon SQS job queue.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::Client;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::job::IngestionJob;
use super::queue::{encode_job, EnqueueReceipt, JobQueue, QueueConfig, QueueError};

pub struct SqsJobQueue {
    client: Client,
    queue_name: String,
    queue_url: OnceCell<String>,
}

impl SqsJobQueue {
    pub async fn new(config: &QueueConfig) -> Self {
        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest());

        if let Some(ref region) = config.region {
            aws_config_builder =
                aws_config_builder.region(aws_config::Region::new(region.clone()));
        }

        if let Some(ref endpoint) = config.endpoint {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;

        Self {
            client: Client::new(&aws_config),
            queue_name: config.queue_name.clone(),
            queue_url: OnceCell::new(),
        }
    }

    /// Queue URL, creating the queue on first use. `create_queue` returns the
    /// existing queue when it is already there.
    async fn queue_url(&self) -> Result<&str, QueueError> {
        let url = self
            .queue_url
            .get_or_try_init(|| async {
                let result = self
                    .client
                    .create_queue()
                    .queue_name(&self.queue_name)
                    .send()
                    .await
                    .map_err(|e| {
                        QueueError::SendFailed(format!("Failed to create SQS queue: {}", e))
                    })?;

                let url = result
                    .queue_url()
                    .ok_or_else(|| {
                        QueueError::SendFailed("SQS create_queue returned no URL".to_string())
                    })?
                    .to_string();

                info!(queue = %self.queue_name, url = %url, "Created/found SQS queue");
                Ok::<_, QueueError>(url)
            })
            .await?;
        Ok(url.as_str())
    }
}

#[async_trait]
impl JobQueue for SqsJobQueue {
    fn name(&self) -> &'static str {
        "sqs"
    }

    async fn enqueue(&self, job: &IngestionJob) -> Result<EnqueueReceipt, QueueError> {
        let queue_url = self.queue_url().await?;
        let body = encode_job(job)?;

        let result = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::SendFailed(format!("SQS send_message failed: {}", e)))?;

        let message_id = result.message_id().unwrap_or_default().to_string();
        debug!(job_id = %job.job_id, message_id = %message_id, "Job enqueued");
        Ok(EnqueueReceipt { message_id })
    }
}
