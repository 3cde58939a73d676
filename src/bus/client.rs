//! Broker client: validated, batched publish and consumer-group subscriptions.
//!
//! The client never holds a lock across a transport call. Producers are cached
//! per topic in the [`ResourceRegistry`]; every subscription is registered
//! there too so a shutdown can drain it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::dispatch::PartitionDispatcher;
use super::{
    BusError, Consumer, DeliveryHandler, ErrorContext, OutboundRecord, PublishError,
    SubscribeError, Transport, TransportErrorHandler,
};
use crate::events::{self, DomainEvent};
use crate::lifecycle::{Closable, LifecycleError, ResourceRegistry};

impl From<LifecycleError> for PublishError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Draining | LifecycleError::Closed => PublishError::Draining,
            LifecycleError::Producer(bus) => PublishError::Transport(bus),
            other => PublishError::Transport(BusError::Publish(other.to_string())),
        }
    }
}

/// Entry point for publishing and subscribing.
#[derive(Clone)]
pub struct BrokerClient {
    transport: Option<Arc<dyn Transport>>,
    registry: Arc<ResourceRegistry>,
}

impl BrokerClient {
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<ResourceRegistry>) -> Self {
        Self {
            transport: Some(transport),
            registry,
        }
    }

    /// A client with no transport. Every publish and subscribe fails with
    /// `NotConfigured`.
    pub fn unconfigured(registry: Arc<ResourceRegistry>) -> Self {
        Self {
            transport: None,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }

    /// Publish events to `topic`.
    ///
    /// Every event is validated before anything is sent. Events are grouped
    /// into batches no larger than the producer's limit; a single event that
    /// cannot fit on its own fails the whole call with `PayloadTooLarge`.
    /// Returns the number of events handed to the transport.
    pub async fn publish(&self, topic: &str, events: &[DomainEvent]) -> Result<usize, PublishError> {
        let transport = self.transport.clone().ok_or(PublishError::NotConfigured)?;

        if events.is_empty() {
            return Ok(0);
        }

        let mut records = Vec::with_capacity(events.len());
        for event in events {
            events::validate(topic, event)?;
            records.push(OutboundRecord {
                key: event.partition_key().to_string(),
                payload: event.to_payload()?,
            });
        }

        let producer = self
            .registry
            .get_or_create_producer(topic, || async move { transport.producer(topic).await })
            .await?;

        let batches = split_batches(topic, records, producer.max_batch_bytes())?;
        let batch_count = batches.len();
        for batch in batches {
            producer.send_batch(batch).await?;
        }

        info!(
            topic = %topic,
            events = events.len(),
            batches = batch_count,
            "Published events"
        );
        Ok(events.len())
    }

    /// Start a consumer-group subscription on `topic`.
    ///
    /// Records are dispatched per partition: sequential within a partition,
    /// concurrent across partitions. The handler isolates its own failures;
    /// transport errors go to `on_error` and the subscription keeps running.
    pub async fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
        handler: Arc<dyn DeliveryHandler>,
        on_error: Arc<dyn TransportErrorHandler>,
    ) -> Result<Arc<SubscriptionHandle>, SubscribeError> {
        let transport = self.transport.as_ref().ok_or(SubscribeError::NotConfigured)?;

        self.registry
            .ensure_accepting()
            .await
            .map_err(|_| SubscribeError::Draining)?;

        let consumer = transport.consumer(topic, consumer_group).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let context = ErrorContext {
            topic: topic.to_string(),
            consumer_group: consumer_group.to_string(),
            partition: None,
        };
        let task = tokio::spawn(run_subscription(
            consumer,
            handler.clone(),
            on_error,
            context,
            shutdown_rx,
        ));

        let handle = Arc::new(SubscriptionHandle {
            topic: topic.to_string(),
            consumer_group: consumer_group.to_string(),
            shutdown: shutdown_tx,
            task: Mutex::new(Some(task)),
            drain_timeout: self.registry.drain_timeout(),
        });

        if let Err(e) = self.registry.register_subscription(handle.clone()).await {
            let _ = handle.close().await;
            warn!(topic = %topic, error = %e, "Subscription rejected during drain");
            return Err(SubscribeError::Draining);
        }

        info!(
            topic = %topic,
            consumer_group = %consumer_group,
            handler = %handler.name(),
            transport = transport.name(),
            "Subscribed"
        );
        Ok(handle)
    }
}

/// Split records into batches whose total size stays within `limit`.
fn split_batches(
    topic: &str,
    records: Vec<OutboundRecord>,
    limit: usize,
) -> Result<Vec<Vec<OutboundRecord>>, PublishError> {
    if let Some(oversized) = records.iter().find(|r| r.size() > limit) {
        return Err(PublishError::PayloadTooLarge {
            topic: topic.to_string(),
            size: oversized.size(),
            limit,
        });
    }

    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0;
    for record in records {
        if !current.is_empty() && current_size + record.size() > limit {
            batches.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += record.size();
        current.push(record);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    Ok(batches)
}

async fn run_subscription(
    mut consumer: Box<dyn Consumer>,
    handler: Arc<dyn DeliveryHandler>,
    on_error: Arc<dyn TransportErrorHandler>,
    context: ErrorContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BusError> {
    let mut dispatcher = PartitionDispatcher::new(handler, consumer.acknowledger());

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            next = consumer.recv() => match next {
                Some(Ok(delivery)) => dispatcher.dispatch(delivery),
                Some(Err(fault)) => {
                    let context = ErrorContext {
                        partition: fault.partition,
                        ..context.clone()
                    };
                    on_error.on_error(&fault.error, &context);
                }
                None => {
                    debug!(topic = %context.topic, "Consumer stream ended");
                    break;
                }
            }
        }
    }

    debug!(
        topic = %context.topic,
        consumer_group = %context.consumer_group,
        partitions = dispatcher.active_partitions(),
        "Stopping subscription"
    );
    dispatcher.abort();
    consumer.close().await
}

/// A live subscription. Closing it stops consumption; in-flight handlers are
/// not awaited.
pub struct SubscriptionHandle {
    topic: String,
    consumer_group: String,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<Result<(), BusError>>>>,
    drain_timeout: Duration,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    pub async fn is_running(&self) -> bool {
        match self.task.lock().await.as_ref() {
            Some(task) => !task.is_finished(),
            None => false,
        }
    }
}

#[async_trait]
impl Closable for SubscriptionHandle {
    fn describe(&self) -> String {
        format!("subscription {}/{}", self.topic, self.consumer_group)
    }

    async fn close(&self) -> Result<(), LifecycleError> {
        let Some(mut task) = self.task.lock().await.take() else {
            return Ok(());
        };
        let _ = self.shutdown.send(true);

        match tokio::time::timeout(self.drain_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(LifecycleError::Close {
                resource: self.describe(),
                message: e.to_string(),
            }),
            Ok(Err(join)) => Err(LifecycleError::Close {
                resource: self.describe(),
                message: join.to_string(),
            }),
            Err(_) => {
                task.abort();
                Err(LifecycleError::Timeout {
                    resource: self.describe(),
                    timeout: self.drain_timeout,
                })
            }
        }
    }
}
