//! Shutdown integration tests.
//!
//! Opens several subscriptions and producers against one registry and checks
//! that a drain attempts every one of them, whatever fails along the way.
//! Run with: cargo test --test shutdown --features test-utils

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use shiksha_relay::bus::{
    BrokerClient, ChannelTransport, Delivery, DeliveryHandler, LogTransportErrors, PublishError,
    SubscribeError, Transport,
};
use shiksha_relay::events::{topics, DomainEvent};
use shiksha_relay::lifecycle::{LifecycleState, ResourceRegistry};
use shiksha_relay::test_utils::{FailingCloseTransport, FakeClosable, RecordingHandler};

// ============================================================================
// Test Fixtures
// ============================================================================

/// Handler that never finishes in test time.
struct StuckHandler {
    started: AtomicUsize,
}

#[async_trait]
impl DeliveryHandler for StuckHandler {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn on_delivery(&self, _delivery: &Delivery) {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

struct Setup {
    client: BrokerClient,
    registry: Arc<ResourceRegistry>,
    transport: Arc<FailingCloseTransport>,
}

async fn setup(failing_topics: &[&str]) -> Setup {
    let inner: Arc<dyn Transport> = Arc::new(ChannelTransport::new(2));
    let transport = Arc::new(FailingCloseTransport::new(inner, failing_topics));
    let registry = Arc::new(ResourceRegistry::with_drain_timeout(Duration::from_secs(1)));
    registry.start().await;
    let client = BrokerClient::new(transport.clone(), registry.clone());
    Setup {
        client,
        registry,
        transport,
    }
}

async fn subscribe(client: &BrokerClient, topic: &str, group: &str) {
    client
        .subscribe(
            topic,
            group,
            Arc::new(RecordingHandler::new()),
            Arc::new(LogTransportErrors),
        )
        .await
        .unwrap();
}

// ============================================================================
// Drain
// ============================================================================

#[tokio::test]
async fn test_drain_attempts_every_resource_despite_failures() {
    let s = setup(&[topics::COURSE]).await;

    subscribe(&s.client, topics::COURSE, "update_redis-group").await;
    subscribe(&s.client, topics::PAYMENT_DONE, "add_course-group").await;
    subscribe(&s.client, topics::MODULE_CREATED, "email-group").await;

    let fake_closes = Arc::new(AtomicUsize::new(0));
    s.registry
        .register_subscription(Arc::new(FakeClosable::new(
            "broken subscription",
            true,
            fake_closes.clone(),
        )))
        .await
        .unwrap();

    s.client
        .publish(topics::COURSE, &[DomainEvent::course_created("c1")])
        .await
        .unwrap();
    s.client
        .publish(topics::PAYMENT_DONE, &[DomainEvent::payment_done("c1", "u1")])
        .await
        .unwrap();
    assert_eq!(s.registry.producer_count().await, 2);
    assert_eq!(s.registry.subscription_count().await, 4);

    let report = s.registry.close_all().await;

    assert_eq!(report.attempted(), 6);
    assert_eq!(report.closed, 4);
    assert_eq!(report.failed.len(), 2);
    let failed: Vec<&str> = report.failed.iter().map(|(r, _)| r.as_str()).collect();
    assert!(failed.contains(&"broken subscription"));
    assert!(failed.contains(&"producer course"));

    assert_eq!(fake_closes.load(Ordering::SeqCst), 1);
    assert_eq!(s.transport.producer_closes(), 2);
    assert_eq!(s.registry.producer_count().await, 0);
    assert_eq!(s.registry.subscription_count().await, 0);
    assert_eq!(s.registry.state().await, LifecycleState::Closed);
}

#[tokio::test]
async fn test_drain_rejects_new_work_and_is_idempotent() {
    let s = setup(&[]).await;
    subscribe(&s.client, topics::COURSE, "update_redis-group").await;

    let first = s.registry.close_all().await;
    assert!(first.is_clean());
    assert_eq!(first.closed, 1);

    let publish = s
        .client
        .publish(topics::COURSE, &[DomainEvent::course_updated("c1")])
        .await;
    assert!(matches!(publish, Err(PublishError::Draining)));

    let subscribe = s
        .client
        .subscribe(
            topics::COURSE,
            "late-group",
            Arc::new(RecordingHandler::new()),
            Arc::new(LogTransportErrors),
        )
        .await;
    assert!(matches!(subscribe, Err(SubscribeError::Draining)));

    let second = s.registry.close_all().await;
    assert_eq!(second.attempted(), 0);
}

#[tokio::test]
async fn test_drain_does_not_wait_for_in_flight_handlers() {
    let s = setup(&[]).await;

    let stuck = Arc::new(StuckHandler {
        started: AtomicUsize::new(0),
    });
    let handle = s
        .client
        .subscribe(
            topics::COURSE,
            "update_redis-group",
            stuck.clone(),
            Arc::new(LogTransportErrors),
        )
        .await
        .unwrap();

    s.client
        .publish(topics::COURSE, &[DomainEvent::course_deleted("c1")])
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while stuck.started.load(Ordering::SeqCst) == 0 {
        assert!(tokio::time::Instant::now() < deadline, "handler never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let report = tokio::time::timeout(Duration::from_secs(2), s.registry.close_all())
        .await
        .expect("drain should not block on a stuck handler");
    assert!(report.is_clean());
    assert!(!handle.is_running().await);
}
