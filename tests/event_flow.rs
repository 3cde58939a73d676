//! Event flow integration tests.
//!
//! Publishes through a real broker client over the channel transport and
//! checks what the consumers did.
//! Run with: cargo test --test event_flow --features test-utils

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use shiksha_relay::bus::{
    BrokerClient, ChannelTransport, LogTransportErrors, OutboundRecord, Transport,
};
use shiksha_relay::cache::{CacheStore, MemoryCache, COURSE_LIST_CACHE_KEY};
use shiksha_relay::consumers::{
    start_consumer, CacheInvalidator, DeliveryContext, EnrollmentWriter, EventConsumer,
    HandlerResult,
};
use shiksha_relay::documents::{DocumentStore, MemoryDocumentStore};
use shiksha_relay::events::{topics, DomainEvent};
use shiksha_relay::lifecycle::ResourceRegistry;
use shiksha_relay::test_utils::{course, user, RecordingHandler};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Fixtures
// ============================================================================

/// Wraps a consumer and counts events it finished handling.
struct Observed {
    inner: Arc<dyn EventConsumer>,
    handled: AtomicUsize,
}

impl Observed {
    fn new(inner: Arc<dyn EventConsumer>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            handled: AtomicUsize::new(0),
        })
    }

    fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    async fn wait_for(&self, n: usize) -> bool {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.handled() < n {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

#[async_trait]
impl EventConsumer for Observed {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn topics(&self) -> &'static [&'static str] {
        self.inner.topics()
    }

    fn default_group(&self) -> &'static str {
        self.inner.default_group()
    }

    async fn handle(&self, event: &DomainEvent, ctx: &DeliveryContext) -> HandlerResult {
        let result = self.inner.handle(event, ctx).await;
        self.handled.fetch_add(1, Ordering::SeqCst);
        result
    }
}

fn broker() -> (BrokerClient, Arc<ChannelTransport>, Arc<ResourceRegistry>) {
    let transport = Arc::new(ChannelTransport::new(4));
    let registry = Arc::new(ResourceRegistry::new());
    let client = BrokerClient::new(transport.clone(), registry.clone());
    (client, transport, registry)
}

async fn start(client: &BrokerClient, consumer: Arc<Observed>) {
    let group = consumer.default_group();
    start_consumer(client, consumer, group, Arc::new(LogTransportErrors))
        .await
        .unwrap();
}

// ============================================================================
// Enrollment
// ============================================================================

#[tokio::test]
async fn test_duplicate_payment_enrolls_once() {
    let (client, _transport, registry) = broker();
    registry.start().await;

    let documents = Arc::new(MemoryDocumentStore::new());
    documents.insert_course(course("c1", "Rust 101", 499.0)).await;
    documents
        .insert_user(user("u1", "Asha", "asha@example.com"))
        .await;

    let enrollment = Observed::new(Arc::new(EnrollmentWriter::new(documents.clone())));
    start(&client, enrollment.clone()).await;

    let payment = DomainEvent::payment_done("c1", "u1");
    client
        .publish(topics::PAYMENT_DONE, &[payment.clone()])
        .await
        .unwrap();
    client.publish(topics::PAYMENT_DONE, &[payment]).await.unwrap();

    assert!(enrollment.wait_for(2).await);

    let course = documents.find_course("c1").await.unwrap().unwrap();
    assert_eq!(course.students.len(), 1);
    assert!(course.has_student("u1"));
    assert_eq!(course.student_count, 1);
    assert_eq!(course.total_earned, 499.0);

    let user = documents.find_user("u1").await.unwrap().unwrap();
    assert_eq!(user.courses, vec!["c1".to_string()]);

    let report = registry.close_all().await;
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_payment_for_unknown_user_changes_nothing() {
    let (client, _transport, registry) = broker();
    registry.start().await;

    let documents = Arc::new(MemoryDocumentStore::new());
    documents.insert_course(course("c1", "Rust 101", 499.0)).await;

    let enrollment = Observed::new(Arc::new(EnrollmentWriter::new(documents.clone())));
    start(&client, enrollment.clone()).await;

    client
        .publish(topics::PAYMENT_DONE, &[DomainEvent::payment_done("c1", "ghost")])
        .await
        .unwrap();
    assert!(enrollment.wait_for(1).await);

    let course = documents.find_course("c1").await.unwrap().unwrap();
    assert!(course.students.is_empty());
    assert_eq!(course.student_count, 0);

    registry.close_all().await;
}

// ============================================================================
// Ordering and tolerance
// ============================================================================

#[tokio::test]
async fn test_per_key_delivery_order() {
    let (client, _transport, registry) = broker();
    registry.start().await;

    let recorder = Arc::new(RecordingHandler::new());
    client
        .subscribe(
            topics::COURSE,
            "order-check",
            recorder.clone(),
            Arc::new(LogTransportErrors),
        )
        .await
        .unwrap();

    let mut published = Vec::new();
    for id in ["c1", "c2", "c3"] {
        published.push(DomainEvent::course_created(id));
    }
    for id in ["c2", "c1", "c3"] {
        published.push(DomainEvent::course_updated(id));
    }
    for id in ["c3", "c1", "c2"] {
        published.push(DomainEvent::course_deleted(id));
    }
    for event in &published {
        client
            .publish(topics::COURSE, std::slice::from_ref(event))
            .await
            .unwrap();
    }

    assert!(recorder.wait_for(published.len(), WAIT).await);

    for id in ["c1", "c2", "c3"] {
        let expected: Vec<String> = published
            .iter()
            .filter(|e| e.partition_key() == id)
            .map(|e| String::from_utf8(e.to_payload().unwrap()).unwrap())
            .collect();
        assert_eq!(recorder.payloads_for_key(id).await, expected, "order for {id}");
    }

    registry.close_all().await;
}

#[tokio::test]
async fn test_unknown_event_kind_is_dropped_and_consumer_continues() {
    let (client, transport, registry) = broker();
    registry.start().await;

    let cache = Arc::new(MemoryCache::new());
    cache.set(COURSE_LIST_CACHE_KEY, "[]").await.unwrap();

    let invalidator = Observed::new(Arc::new(CacheInvalidator::new(
        cache.clone(),
        COURSE_LIST_CACHE_KEY,
    )));
    start(&client, invalidator.clone()).await;

    // Published by another service straight onto the topic.
    let producer = transport.producer(topics::COURSE).await.unwrap();
    producer
        .send_batch(vec![
            OutboundRecord {
                key: "c1".to_string(),
                payload: br#"{"eventtype":"course_archived","course_id":"c1"}"#.to_vec(),
            },
            OutboundRecord {
                key: "c1".to_string(),
                payload: b"not json".to_vec(),
            },
        ])
        .await
        .unwrap();

    client
        .publish(topics::COURSE, &[DomainEvent::course_updated("c1")])
        .await
        .unwrap();

    assert!(invalidator.wait_for(1).await);
    assert_eq!(invalidator.handled(), 1);
    assert!(!cache.contains(COURSE_LIST_CACHE_KEY).await);

    registry.close_all().await;
}

#[tokio::test]
async fn test_publish_rejects_kind_not_in_topic_catalog() {
    let (client, _transport, registry) = broker();
    registry.start().await;

    let result = client
        .publish(topics::COURSE, &[DomainEvent::payment_done("c1", "u1")])
        .await;
    assert!(result.is_err());
    assert_eq!(registry.producer_count().await, 0);
}
