//! Test fixtures and fakes.
//!
//! Record builders for the document store, a deterministic access signer,
//! a delivery handler that records what it sees, and transport/lifecycle
//! fakes whose close fails on demand.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::sync::RwLock;

use crate::bus::{BusError, Consumer, Delivery, DeliveryHandler, OutboundRecord, Producer, Transport};
use crate::consumers::DeliveryContext;
use crate::documents::{CourseRecord, ModuleRecord, UserRecord};
use crate::ingest::{AccessConfig, AccessSigner, Containers};
use crate::lifecycle::{Closable, LifecycleError};

/// Base64 of the key used by [`test_signer`].
pub fn test_account_key() -> String {
    STANDARD.encode(b"shiksha-test-signing-key")
}

/// Signer for account `shiksha` with the default containers.
pub fn test_signer() -> AccessSigner {
    let config = AccessConfig {
        account_name: "shiksha".to_string(),
        account_key: Some(test_account_key()),
        base_url: None,
    };
    match AccessSigner::new(&config, Containers::default()) {
        Ok(signer) => signer,
        Err(e) => panic!("test signer: {e}"),
    }
}

pub fn course(id: &str, name: &str, price: f64) -> CourseRecord {
    CourseRecord {
        id: id.to_string(),
        name: name.to_string(),
        price,
        teacher_name: Some("Meera".to_string()),
        students: Vec::new(),
        student_count: 0,
        total_earned: 0.0,
    }
}

pub fn user(id: &str, name: &str, email: &str) -> UserRecord {
    UserRecord {
        id: id.to_string(),
        name: name.to_string(),
        email: email.to_string(),
        courses: Vec::new(),
    }
}

pub fn module(id: &str, course_id: &str, title: &str) -> ModuleRecord {
    ModuleRecord {
        id: id.to_string(),
        course_id: course_id.to_string(),
        title: title.to_string(),
        description: format!("{title} in depth"),
    }
}

pub fn delivery_context(topic: &str) -> DeliveryContext {
    DeliveryContext {
        topic: topic.to_string(),
        partition: 0,
        offset: 0,
    }
}

/// Delivery handler recording each delivery.
#[derive(Default)]
pub struct RecordingHandler {
    deliveries: RwLock<Vec<Delivery>>,
    count: AtomicUsize,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.read().await.clone()
    }

    /// Payloads, as strings, of deliveries carrying `key`, in arrival order.
    pub async fn payloads_for_key(&self, key: &str) -> Vec<String> {
        self.deliveries
            .read()
            .await
            .iter()
            .filter(|d| d.key.as_deref() == Some(key))
            .map(|d| String::from_utf8_lossy(&d.payload).into_owned())
            .collect()
    }

    /// Wait until at least `n` deliveries arrived or `timeout` passes.
    pub async fn wait_for(&self, n: usize, timeout: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.count() < n {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        true
    }
}

#[async_trait]
impl DeliveryHandler for RecordingHandler {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_delivery(&self, delivery: &Delivery) {
        self.deliveries.write().await.push(delivery.clone());
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Closable counting close calls, optionally failing them.
pub struct FakeClosable {
    name: String,
    fail: bool,
    closes: Arc<AtomicUsize>,
}

impl FakeClosable {
    pub fn new(name: impl Into<String>, fail: bool, closes: Arc<AtomicUsize>) -> Self {
        Self {
            name: name.into(),
            fail,
            closes,
        }
    }
}

#[async_trait]
impl Closable for FakeClosable {
    fn describe(&self) -> String {
        self.name.clone()
    }

    async fn close(&self) -> Result<(), LifecycleError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(LifecycleError::Close {
                resource: self.name.clone(),
                message: "simulated close failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Transport wrapper whose producers fail to close on selected topics.
pub struct FailingCloseTransport {
    inner: Arc<dyn Transport>,
    failing_topics: HashSet<String>,
    producer_closes: Arc<AtomicUsize>,
}

impl FailingCloseTransport {
    pub fn new(inner: Arc<dyn Transport>, failing_topics: &[&str]) -> Self {
        Self {
            inner,
            failing_topics: failing_topics.iter().map(|t| t.to_string()).collect(),
            producer_closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Close calls seen by producers from this transport.
    pub fn producer_closes(&self) -> usize {
        self.producer_closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FailingCloseTransport {
    fn name(&self) -> &'static str {
        "failing-close"
    }

    async fn producer(&self, topic: &str) -> Result<Arc<dyn Producer>, BusError> {
        let inner = self.inner.producer(topic).await?;
        Ok(Arc::new(FailingCloseProducer {
            inner,
            fail: self.failing_topics.contains(topic),
            closes: self.producer_closes.clone(),
        }))
    }

    async fn consumer(&self, topic: &str, consumer_group: &str) -> Result<Box<dyn Consumer>, BusError> {
        self.inner.consumer(topic, consumer_group).await
    }
}

struct FailingCloseProducer {
    inner: Arc<dyn Producer>,
    fail: bool,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Producer for FailingCloseProducer {
    fn topic(&self) -> &str {
        self.inner.topic()
    }

    fn max_batch_bytes(&self) -> usize {
        self.inner.max_batch_bytes()
    }

    async fn send_batch(&self, records: Vec<OutboundRecord>) -> Result<(), BusError> {
        self.inner.send_batch(records).await
    }

    async fn close(&self) -> Result<(), BusError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await?;
        if self.fail {
            return Err(BusError::Connection("simulated close failure".to_string()));
        }
        Ok(())
    }
}
