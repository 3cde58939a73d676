//! In-memory partitioned transport for standalone mode.
//!
//! Each topic owns a fixed number of partitions, each backed by a tokio
//! broadcast channel. Records are routed by a stable hash of their key, so
//! records sharing a key land on the same partition in send order.
//!
//! Every consumer receives every record published after it subscribed.
//! Consumer groups are accepted but not load-balanced: two subscriptions in
//! the same group each see the full stream.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{
    Acknowledger, BusError, Consumer, Delivery, NoopAcknowledger, OutboundRecord, Producer,
    Result, Transport, TransportFault,
};

/// Channel capacity per partition.
const CHANNEL_CAPACITY: usize = 1024;

/// Default batch size limit.
const DEFAULT_MAX_BATCH_BYTES: usize = 1024 * 1024;

/// Stable partition for a key.
pub fn partition_for(key: &str, partitions: usize) -> i32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as i32
}

struct TopicChannels {
    partitions: Vec<broadcast::Sender<Delivery>>,
    next_offsets: Vec<AtomicI64>,
}

impl TopicChannels {
    fn new(partitions: usize) -> Self {
        let partitions = partitions.max(1);
        Self {
            partitions: (0..partitions)
                .map(|_| broadcast::channel(CHANNEL_CAPACITY).0)
                .collect(),
            next_offsets: (0..partitions).map(|_| AtomicI64::new(0)).collect(),
        }
    }
}

/// In-memory transport using per-partition broadcast channels.
pub struct ChannelTransport {
    partitions: usize,
    max_batch_bytes: usize,
    topics: Mutex<HashMap<String, Arc<TopicChannels>>>,
}

impl ChannelTransport {
    /// Create a transport with `partitions` partitions per topic.
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Override the batch size limit.
    pub fn with_max_batch_bytes(mut self, max_batch_bytes: usize) -> Self {
        self.max_batch_bytes = max_batch_bytes;
        self
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    fn topic(&self, topic: &str) -> Result<Arc<TopicChannels>> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| BusError::Connection("channel topic table poisoned".to_string()))?;
        Ok(topics
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(TopicChannels::new(self.partitions)))
            .clone())
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn producer(&self, topic: &str) -> Result<Arc<dyn Producer>> {
        let channels = self.topic(topic)?;
        debug!(topic = %topic, "Channel producer created");
        Ok(Arc::new(ChannelProducer {
            topic: topic.to_string(),
            channels,
            max_batch_bytes: self.max_batch_bytes,
            closed: AtomicBool::new(false),
        }))
    }

    async fn consumer(&self, topic: &str, consumer_group: &str) -> Result<Box<dyn Consumer>> {
        let channels = self.topic(topic)?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        // Receivers are attached before returning so nothing published after
        // this call is missed.
        let forwarders = channels
            .partitions
            .iter()
            .enumerate()
            .map(|(partition, sender)| {
                let receiver = sender.subscribe();
                tokio::spawn(forward_partition(partition as i32, receiver, tx.clone()))
            })
            .collect();

        info!(
            topic = %topic,
            consumer_group = %consumer_group,
            partitions = channels.partitions.len(),
            "Channel consumer started"
        );

        Ok(Box::new(ChannelConsumer { rx, forwarders }))
    }
}

async fn forward_partition(
    partition: i32,
    mut receiver: broadcast::Receiver<Delivery>,
    tx: mpsc::Sender<std::result::Result<Delivery, TransportFault>>,
) {
    loop {
        let item = match receiver.recv().await {
            Ok(delivery) => Ok(delivery),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Err(TransportFault::new(
                Some(partition),
                BusError::Lagged { partition, skipped },
            )),
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if tx.send(item).await.is_err() {
            break;
        }
    }
}

/// Producer for one channel topic.
pub struct ChannelProducer {
    topic: String,
    channels: Arc<TopicChannels>,
    max_batch_bytes: usize,
    closed: AtomicBool,
}

#[async_trait]
impl Producer for ChannelProducer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn max_batch_bytes(&self) -> usize {
        self.max_batch_bytes
    }

    async fn send_batch(&self, records: Vec<OutboundRecord>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let partitions = self.channels.partitions.len();
        for record in records {
            let partition = partition_for(&record.key, partitions);
            let idx = partition as usize;
            let offset = self.channels.next_offsets[idx].fetch_add(1, Ordering::SeqCst);
            let delivery = Delivery {
                topic: self.topic.clone(),
                partition,
                offset,
                key: Some(record.key),
                payload: record.payload,
            };

            // No receivers is fine: nobody has subscribed yet.
            let receivers = self.channels.partitions[idx].send(delivery).unwrap_or(0);
            debug!(
                topic = %self.topic,
                partition,
                offset,
                receivers,
                "Record sent to channel"
            );
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Consumer merging all partitions of a channel topic.
pub struct ChannelConsumer {
    rx: mpsc::Receiver<std::result::Result<Delivery, TransportFault>>,
    forwarders: Vec<JoinHandle<()>>,
}

#[async_trait]
impl Consumer for ChannelConsumer {
    async fn recv(&mut self) -> Option<std::result::Result<Delivery, TransportFault>> {
        self.rx.recv().await
    }

    fn acknowledger(&self) -> Arc<dyn Acknowledger> {
        Arc::new(NoopAcknowledger)
    }

    async fn close(&mut self) -> Result<()> {
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }
        self.rx.close();
        Ok(())
    }
}

impl Drop for ChannelConsumer {
    fn drop(&mut self) {
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
    }
}

#[cfg(test)]
mod tests;
