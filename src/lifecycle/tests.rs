use super::*;
use crate::bus::OutboundRecord;
use crate::test_utils::FakeClosable;
use std::sync::atomic::{AtomicUsize, Ordering};

struct FakeProducer {
    topic: String,
    fail: bool,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Producer for FakeProducer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn max_batch_bytes(&self) -> usize {
        1024
    }

    async fn send_batch(&self, _records: Vec<OutboundRecord>) -> Result<(), BusError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(BusError::Connection("broker gone".to_string()))
        } else {
            Ok(())
        }
    }
}

fn producer(topic: &str, fail: bool, closes: &Arc<AtomicUsize>) -> Arc<dyn Producer> {
    Arc::new(FakeProducer {
        topic: topic.to_string(),
        fail,
        closes: closes.clone(),
    })
}

fn closable(name: &str, fail: bool, closes: &Arc<AtomicUsize>) -> Arc<dyn Closable> {
    Arc::new(FakeClosable::new(name, fail, closes.clone()))
}

#[tokio::test]
async fn test_registry_starts_unstarted_and_runs_on_first_use() {
    let registry = ResourceRegistry::new();
    assert_eq!(registry.state().await, LifecycleState::Unstarted);

    registry.ensure_accepting().await.unwrap();
    assert_eq!(registry.state().await, LifecycleState::Running);
    assert!(!registry.start().await);
}

#[tokio::test]
async fn test_producer_created_once_per_topic() {
    let registry = ResourceRegistry::new();
    let closes = Arc::new(AtomicUsize::new(0));
    let created = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let created = created.clone();
        let closes = closes.clone();
        registry
            .get_or_create_producer("course", || async move {
                created.fetch_add(1, Ordering::SeqCst);
                Ok(producer("course", false, &closes))
            })
            .await
            .unwrap();
    }

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(registry.producer_count().await, 1);
}

#[tokio::test]
async fn test_producer_creation_error_not_cached() {
    let registry = ResourceRegistry::new();

    let err = registry
        .get_or_create_producer("course", || async {
            Err(BusError::Connection("refused".to_string()))
        })
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LifecycleError::Producer(_)));
    assert_eq!(registry.producer_count().await, 0);
}

#[tokio::test]
async fn test_close_all_closes_everything_despite_failures() {
    let registry = ResourceRegistry::new();
    let closes = Arc::new(AtomicUsize::new(0));

    for (i, fail) in [false, true, false].into_iter().enumerate() {
        registry
            .register_subscription(closable(&format!("sub-{i}"), fail, &closes))
            .await
            .unwrap();
    }
    for (topic, fail) in [("course", true), ("payment-done", false)] {
        let closes = closes.clone();
        registry
            .get_or_create_producer(topic, || async move { Ok(producer(topic, fail, &closes)) })
            .await
            .unwrap();
    }

    let report = registry.close_all().await;

    assert_eq!(closes.load(Ordering::SeqCst), 5);
    assert_eq!(report.attempted(), 5);
    assert_eq!(report.closed, 3);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(registry.state().await, LifecycleState::Closed);
}

#[tokio::test]
async fn test_close_all_is_idempotent() {
    let registry = ResourceRegistry::new();
    let closes = Arc::new(AtomicUsize::new(0));
    registry
        .register_subscription(closable("sub", false, &closes))
        .await
        .unwrap();

    registry.close_all().await;
    let second = registry.close_all().await;

    assert_eq!(second.attempted(), 0);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_closed_registry_rejects_new_resources() {
    let registry = ResourceRegistry::new();
    registry.close_all().await;

    let closes = Arc::new(AtomicUsize::new(0));
    let err = registry
        .register_subscription(closable("late", false, &closes))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Closed));

    let err = registry
        .get_or_create_producer("course", || async move { Ok(producer("course", false, &closes)) })
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LifecycleError::Closed));
}
