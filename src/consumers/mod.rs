//! Side-effect consumers.
//!
//! Each consumer reacts to a subset of event kinds on one or more topics and
//! calls into the document store, cache, blob store, job queue, search index
//! or notifier. Handlers never fail a delivery: a collaborator error is
//! returned as [`HandlerResult::Handled`], logged by the [`ConsumerAdapter`],
//! and the partition moves on.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::blob::BlobError;
use crate::bus::{
    BrokerClient, Delivery, DeliveryHandler, SubscribeError, SubscriptionHandle,
    TransportErrorHandler,
};
use crate::cache::CacheError;
use crate::documents::DocumentError;
use crate::events::{self, DomainEvent};
use crate::index::IndexError;
use crate::ingest::{AccessError, IngestError, JobValidationError, QueueError};
use crate::notify::NotifyError;

pub mod cache_invalidator;
pub mod content;
pub mod course_cleanup;
pub mod enrollment;
pub mod notifier;

pub use cache_invalidator::CacheInvalidator;
pub use content::ContentPropagator;
pub use course_cleanup::CourseCleanup;
pub use enrollment::EnrollmentWriter;
pub use notifier::Notifier;

/// Where an event came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryContext {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl From<&Delivery> for DeliveryContext {
    fn from(delivery: &Delivery) -> Self {
        Self {
            topic: delivery.topic.clone(),
            partition: delivery.partition,
            offset: delivery.offset,
        }
    }
}

/// A collaborator failure inside a handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("document store: {0}")]
    Documents(#[from] DocumentError),

    #[error("cache: {0}")]
    Cache(#[from] CacheError),

    #[error("blob store: {0}")]
    Blob(#[from] BlobError),

    #[error("notifier: {0}")]
    Notify(#[from] NotifyError),

    #[error("search index: {0}")]
    Index(#[from] IndexError),

    #[error("signed access: {0}")]
    Access(#[from] AccessError),

    #[error("job queue: {0}")]
    Queue(#[from] QueueError),

    #[error("job contract: {0}")]
    Job(#[from] JobValidationError),

    /// Independent steps of which at least one failed.
    #[error("{} step(s) failed: {}", .0.len(), describe_steps(.0))]
    Steps(Vec<(&'static str, HandlerError)>),
}

impl From<IngestError> for HandlerError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Validation(e) => HandlerError::Job(e),
            IngestError::Blob(e) => HandlerError::Blob(e),
            IngestError::Access(e) => HandlerError::Access(e),
            IngestError::Queue(e) => HandlerError::Queue(e),
        }
    }
}

fn describe_steps(steps: &[(&'static str, HandlerError)]) -> String {
    steps
        .iter()
        .map(|(step, err)| format!("{step}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Outcome of handling one event. There is no failure variant: a failed
/// side effect is still a processed event.
#[derive(Debug)]
pub enum HandlerResult {
    Ok,
    Handled(HandlerError),
}

impl HandlerResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, HandlerResult::Ok)
    }

    pub fn error(&self) -> Option<&HandlerError> {
        match self {
            HandlerResult::Ok => None,
            HandlerResult::Handled(e) => Some(e),
        }
    }
}

impl From<Result<(), HandlerError>> for HandlerResult {
    fn from(result: Result<(), HandlerError>) -> Self {
        match result {
            Ok(()) => HandlerResult::Ok,
            Err(e) => HandlerResult::Handled(e),
        }
    }
}

/// A typed event consumer.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Topics this consumer subscribes to.
    fn topics(&self) -> &'static [&'static str];

    /// Consumer group used unless configuration overrides it.
    fn default_group(&self) -> &'static str;

    /// Handle one event. Kinds the consumer does not act on return `Ok`.
    async fn handle(&self, event: &DomainEvent, ctx: &DeliveryContext) -> HandlerResult;
}

/// Decodes deliveries and feeds them to an [`EventConsumer`].
///
/// Undecodable or unknown envelopes are logged and dropped.
pub struct ConsumerAdapter {
    consumer: Arc<dyn EventConsumer>,
}

impl ConsumerAdapter {
    pub fn new(consumer: Arc<dyn EventConsumer>) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl DeliveryHandler for ConsumerAdapter {
    fn name(&self) -> &str {
        self.consumer.name()
    }

    async fn on_delivery(&self, delivery: &Delivery) {
        let ctx = DeliveryContext::from(delivery);

        let event = match events::decode(&delivery.topic, &delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    consumer = self.consumer.name(),
                    topic = %ctx.topic,
                    partition = ctx.partition,
                    offset = ctx.offset,
                    error = %e,
                    "Dropping event"
                );
                return;
            }
        };

        match self.consumer.handle(&event, &ctx).await {
            HandlerResult::Ok => debug!(
                consumer = self.consumer.name(),
                event_kind = %event.kind(),
                partition_key = %event.partition_key(),
                partition = ctx.partition,
                offset = ctx.offset,
                "Event handled"
            ),
            HandlerResult::Handled(e) => error!(
                consumer = self.consumer.name(),
                event_kind = %event.kind(),
                partition_key = %event.partition_key(),
                partition = ctx.partition,
                offset = ctx.offset,
                error = %e,
                "Event side effect failed"
            ),
        }
    }
}

/// Subscribe `consumer` to each of its topics under `consumer_group`.
pub async fn start_consumer(
    client: &BrokerClient,
    consumer: Arc<dyn EventConsumer>,
    consumer_group: &str,
    on_error: Arc<dyn TransportErrorHandler>,
) -> Result<Vec<Arc<SubscriptionHandle>>, SubscribeError> {
    let adapter: Arc<dyn DeliveryHandler> = Arc::new(ConsumerAdapter::new(consumer.clone()));

    let mut handles = Vec::with_capacity(consumer.topics().len());
    for topic in consumer.topics() {
        let handle = client
            .subscribe(topic, consumer_group, adapter.clone(), on_error.clone())
            .await?;
        handles.push(handle);
    }

    info!(
        consumer = consumer.name(),
        consumer_group = %consumer_group,
        topics = ?consumer.topics(),
        "Consumer started"
    );
    Ok(handles)
}

/// The consumers this crate ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerKind {
    Enrollment,
    CacheInvalidator,
    CourseCleanup,
    Content,
    Notifier,
}

impl ConsumerKind {
    pub const ALL: [ConsumerKind; 5] = [
        ConsumerKind::Enrollment,
        ConsumerKind::CacheInvalidator,
        ConsumerKind::CourseCleanup,
        ConsumerKind::Content,
        ConsumerKind::Notifier,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConsumerKind::Enrollment => "enrollment",
            ConsumerKind::CacheInvalidator => "cache_invalidator",
            ConsumerKind::CourseCleanup => "course_cleanup",
            ConsumerKind::Content => "content",
            ConsumerKind::Notifier => "notifier",
        }
    }
}

/// Which consumers run, and under which groups.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumersConfig {
    pub enabled: Vec<ConsumerKind>,
    /// Consumer group overrides keyed by consumer name.
    pub groups: HashMap<String, String>,
}

impl Default for ConsumersConfig {
    fn default() -> Self {
        Self {
            enabled: ConsumerKind::ALL.to_vec(),
            groups: HashMap::new(),
        }
    }
}

impl ConsumersConfig {
    pub fn is_enabled(&self, kind: ConsumerKind) -> bool {
        self.enabled.contains(&kind)
    }

    /// Group for `consumer`: the configured override or its default.
    pub fn group_for<'a>(&'a self, consumer: &'a dyn EventConsumer) -> &'a str {
        self.groups
            .get(consumer.name())
            .map(String::as_str)
            .unwrap_or_else(|| consumer.default_group())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::topics;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingConsumer {
        handled: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EventConsumer for CountingConsumer {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn topics(&self) -> &'static [&'static str] {
            &[topics::COURSE]
        }

        fn default_group(&self) -> &'static str {
            "counting-group"
        }

        async fn handle(&self, _event: &DomainEvent, _ctx: &DeliveryContext) -> HandlerResult {
            self.handled.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                HandlerResult::Handled(HandlerError::Cache(CacheError::Command("boom".into())))
            } else {
                HandlerResult::Ok
            }
        }
    }

    fn delivery(payload: &str) -> Delivery {
        Delivery {
            topic: topics::COURSE.to_string(),
            partition: 0,
            offset: 7,
            key: Some("c1".to_string()),
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_adapter_drops_unknown_and_malformed() {
        let consumer = Arc::new(CountingConsumer {
            handled: AtomicUsize::new(0),
            fail: false,
        });
        let adapter = ConsumerAdapter::new(consumer.clone());

        adapter
            .on_delivery(&delivery(r#"{"eventtype":"course_archived","course_id":"c1"}"#))
            .await;
        adapter.on_delivery(&delivery("not json")).await;
        adapter.on_delivery(&delivery(r#"{"eventtype":"course_created"}"#)).await;
        assert_eq!(consumer.handled.load(Ordering::SeqCst), 0);

        adapter
            .on_delivery(&delivery(r#"{"eventtype":"course_created","course_id":"c1"}"#))
            .await;
        assert_eq!(consumer.handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_adapter_swallows_handler_failure() {
        let consumer = Arc::new(CountingConsumer {
            handled: AtomicUsize::new(0),
            fail: true,
        });
        let adapter = ConsumerAdapter::new(consumer.clone());

        adapter
            .on_delivery(&delivery(r#"{"eventtype":"course_updated","course_id":"c1"}"#))
            .await;
        adapter
            .on_delivery(&delivery(r#"{"eventtype":"course_updated","course_id":"c1"}"#))
            .await;
        assert_eq!(consumer.handled.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_steps_error_lists_each_failure() {
        let err = HandlerError::Steps(vec![
            ("index_delete", HandlerError::Index(IndexError::Unavailable("503".into()))),
            ("blob_delete", HandlerError::Blob(BlobError::StoreFailed("disk".into()))),
        ]);
        let message = err.to_string();
        assert!(message.starts_with("2 step(s) failed"));
        assert!(message.contains("index_delete: search index"));
        assert!(message.contains("blob_delete: blob store"));
    }

    #[test]
    fn test_consumers_config() {
        let config: ConsumersConfig =
            serde_yaml::from_str("enabled: [enrollment, notifier]\ngroups:\n  counting: custom\n")
                .unwrap();
        assert!(config.is_enabled(ConsumerKind::Enrollment));
        assert!(!config.is_enabled(ConsumerKind::Content));

        let consumer = CountingConsumer {
            handled: AtomicUsize::new(0),
            fail: false,
        };
        assert_eq!(config.group_for(&consumer), "custom");
        assert_eq!(ConsumersConfig::default().group_for(&consumer), "counting-group");
        assert_eq!(ConsumersConfig::default().enabled.len(), 5);
    }
}
