//! Content lifecycle propagator.
//!
//! Uploaded videos and notes become ingestion jobs; removed ones are purged
//! from the search index and from blob storage. The two purge steps run
//! independently: either may fail without skipping the other.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use super::{DeliveryContext, EventConsumer, HandlerError, HandlerResult};
use crate::blob::BlobStore;
use crate::events::{topics, DomainEvent};
use crate::index::{IndexFilter, SearchIndex};
use crate::ingest::{Category, IngestionJob, IngestionPipeline, JobMetadata, SourceType};

pub const CONSUMER_GROUP: &str = "material-group";

pub struct ContentPropagator {
    pipeline: IngestionPipeline,
    blobs: Arc<dyn BlobStore>,
    index: Arc<dyn SearchIndex>,
}

impl ContentPropagator {
    pub fn new(
        pipeline: IngestionPipeline,
        blobs: Arc<dyn BlobStore>,
        index: Arc<dyn SearchIndex>,
    ) -> Self {
        Self {
            pipeline,
            blobs,
            index,
        }
    }

    async fn queue_job(&self, blob_name: &str, metadata: JobMetadata) -> Result<(), HandlerError> {
        let access = self
            .pipeline
            .issue_signed_access(blob_name, Category::from_blob_name(blob_name))?;
        let job = IngestionJob::new(access.url, metadata)?;
        self.pipeline.enqueue(&job).await?;
        Ok(())
    }

    async fn purge(&self, filter: IndexFilter, blob_name: &str) -> Result<(), HandlerError> {
        let mut failures = Vec::new();

        match self.index.delete(&filter).await {
            Ok(()) => info!(filter = ?filter, "Search index entries removed"),
            Err(e) => {
                error!(filter = ?filter, error = %e, "Search index delete failed");
                failures.push(("index_delete", HandlerError::from(e)));
            }
        }

        let container = self
            .pipeline
            .signer()
            .containers()
            .for_category(Category::from_blob_name(blob_name))
            .to_string();
        match self.blobs.delete(&container, blob_name).await {
            Ok(existed) => info!(
                container = %container,
                blob_name = %blob_name,
                existed,
                "Blob deleted"
            ),
            Err(e) => {
                error!(container = %container, blob_name = %blob_name, error = %e, "Blob delete failed");
                failures.push(("blob_delete", HandlerError::from(e)));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(HandlerError::Steps(failures))
        }
    }
}

#[async_trait]
impl EventConsumer for ContentPropagator {
    fn name(&self) -> &'static str {
        "content"
    }

    fn topics(&self) -> &'static [&'static str] {
        &[topics::CONTENT]
    }

    fn default_group(&self) -> &'static str {
        CONSUMER_GROUP
    }

    async fn handle(&self, event: &DomainEvent, _ctx: &DeliveryContext) -> HandlerResult {
        let result = match event {
            DomainEvent::VideoCreated(video) => {
                let mut metadata =
                    JobMetadata::new(&video.course_id, &video.module_id, SourceType::Video)
                        .with_video_id(&video.video_id);
                metadata.original_name = video.original_name.clone();
                self.queue_job(&video.blob_name, metadata).await
            }
            DomainEvent::NoteCreated(note) => {
                let mut metadata =
                    JobMetadata::new(&note.course_id, &note.module_id, SourceType::Notes)
                        .with_notes_id(&note.note_id);
                metadata.original_name = note.original_name.clone();
                self.queue_job(&note.blob_name, metadata).await
            }
            DomainEvent::VideoDeleted(video) => {
                self.purge(IndexFilter::VideoId(video.video_id.clone()), &video.blob_name)
                    .await
            }
            DomainEvent::NoteDeleted(note) => {
                self.purge(IndexFilter::NotesId(note.note_id.clone()), &note.blob_name)
                    .await
            }
            _ => Ok(()),
        };
        result.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::events::{NoteDeleted, VideoCreated, VideoDeleted};
    use crate::index::MockSearchIndex;
    use crate::ingest::MemoryJobQueue;
    use crate::test_utils::{delivery_context, test_signer};

    struct Fixture {
        propagator: ContentPropagator,
        blobs: Arc<MemoryBlobStore>,
        queue: Arc<MemoryJobQueue>,
        index: Arc<MockSearchIndex>,
    }

    fn fixture() -> Fixture {
        let blobs = Arc::new(MemoryBlobStore::new());
        let queue = Arc::new(MemoryJobQueue::new("ingestion-jobs"));
        let index = Arc::new(MockSearchIndex::new());
        let pipeline = IngestionPipeline::new(blobs.clone(), test_signer(), queue.clone());
        Fixture {
            propagator: ContentPropagator::new(pipeline, blobs.clone(), index.clone()),
            blobs,
            queue,
            index,
        }
    }

    fn video_deleted() -> DomainEvent {
        DomainEvent::VideoDeleted(VideoDeleted {
            video_id: "v1".to_string(),
            blob_name: "video/v1.mp4".to_string(),
        })
    }

    #[tokio::test]
    async fn test_video_created_queues_job() {
        let f = fixture();
        let event = DomainEvent::VideoCreated(VideoCreated {
            course_id: "c1".to_string(),
            module_id: "m1".to_string(),
            video_id: "v1".to_string(),
            blob_name: "video/v1.mp4".to_string(),
            original_name: Some("lecture.mp4".to_string()),
        });

        assert!(f
            .propagator
            .handle(&event, &delivery_context(topics::CONTENT))
            .await
            .is_ok());

        let jobs = f.queue.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].metadata.source_type, SourceType::Video);
        assert_eq!(jobs[0].metadata.video_id.as_deref(), Some("v1"));
        assert_eq!(jobs[0].metadata.original_name.as_deref(), Some("lecture.mp4"));
        assert!(jobs[0].blob_url.contains("/private/video/v1.mp4?sp=r&se="));
    }

    #[tokio::test]
    async fn test_deletion_purges_index_and_blob() {
        let f = fixture();
        f.blobs.put("private", "video/v1.mp4", b"mp4", "video/mp4").await.unwrap();

        assert!(f
            .propagator
            .handle(&video_deleted(), &delivery_context(topics::CONTENT))
            .await
            .is_ok());

        assert_eq!(f.index.deleted().await, vec![IndexFilter::VideoId("v1".to_string())]);
        assert!(!f.blobs.contains("private", "video/v1.mp4").await);
    }

    #[tokio::test]
    async fn test_index_failure_does_not_block_blob_delete() {
        let f = fixture();
        f.blobs.put("private", "video/v1.mp4", b"mp4", "video/mp4").await.unwrap();
        f.index.set_fail_on_delete(true).await;

        let result = f
            .propagator
            .handle(&video_deleted(), &delivery_context(topics::CONTENT))
            .await;

        match result {
            HandlerResult::Handled(HandlerError::Steps(steps)) => {
                assert_eq!(steps.len(), 1);
                assert_eq!(steps[0].0, "index_delete");
            }
            other => panic!("expected step failure, got {other:?}"),
        }
        assert!(!f.blobs.contains("private", "video/v1.mp4").await);
    }

    #[tokio::test]
    async fn test_blob_failure_does_not_block_index_delete() {
        let f = fixture();
        f.blobs.set_fail_on_delete(true).await;

        let event = DomainEvent::NoteDeleted(NoteDeleted {
            note_id: "n1".to_string(),
            blob_name: "material/n1.pdf".to_string(),
        });
        let result = f
            .propagator
            .handle(&event, &delivery_context(topics::CONTENT))
            .await;

        assert!(matches!(result, HandlerResult::Handled(HandlerError::Steps(ref s)) if s[0].0 == "blob_delete"));
        assert_eq!(f.index.deleted().await, vec![IndexFilter::NotesId("n1".to_string())]);
    }

    #[tokio::test]
    async fn test_redelivered_deletion_is_tolerated() {
        let f = fixture();
        let ctx = delivery_context(topics::CONTENT);

        assert!(f.propagator.handle(&video_deleted(), &ctx).await.is_ok());
        assert!(f.propagator.handle(&video_deleted(), &ctx).await.is_ok());
        assert_eq!(f.index.deleted().await.len(), 2);
    }
}
