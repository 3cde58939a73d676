//! Partitioned publish/subscribe broker.
//!
//! This module contains:
//! - `Transport`, `Producer`, `Consumer` traits: the seam between the broker
//!   client and a concrete log-structured transport
//! - `BrokerClient`: validated publish and group subscriptions (see `client`)
//! - Per-partition dispatch (see `dispatch`)
//! - Implementations: in-memory channel, Kafka
//! - Bus configuration types

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info};

use crate::events::SchemaError;

// Implementation modules
#[cfg(feature = "channel")]
pub mod channel;
pub mod client;
pub(crate) mod dispatch;
#[cfg(feature = "kafka")]
pub mod kafka;

// Re-exports
#[cfg(feature = "channel")]
pub use channel::ChannelTransport;
pub use client::{BrokerClient, SubscriptionHandle};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaTransport, KafkaTransportConfig};

// ============================================================================
// Errors
// ============================================================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors raised by a transport.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Acknowledge failed: {0}")]
    Ack(String),

    #[error("Consumer lagged on partition {partition}, skipped {skipped} records")]
    Lagged { partition: i32, skipped: u64 },

    #[error("Transport closed")]
    Closed,

    #[error("Transport not configured: {0}")]
    NotConfigured(String),
}

/// Errors returned by [`BrokerClient::publish`].
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("No broker transport configured")]
    NotConfigured,

    #[error("Broker is draining; publish rejected")]
    Draining,

    #[error("Event of {size} bytes exceeds the {limit} byte batch limit on topic '{topic}'")]
    PayloadTooLarge {
        topic: String,
        size: usize,
        limit: usize,
    },

    #[error("Invalid event: {0}")]
    Schema(#[from] SchemaError),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] BusError),
}

/// Errors returned by [`BrokerClient::subscribe`].
#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("No broker transport configured")]
    NotConfigured,

    #[error("Broker is draining; subscribe rejected")]
    Draining,

    #[error(transparent)]
    Transport(#[from] BusError),
}

// ============================================================================
// Records
// ============================================================================

/// A keyed record ready to hand to a producer.
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    pub key: String,
    pub payload: Vec<u8>,
}

impl OutboundRecord {
    pub fn size(&self) -> usize {
        self.key.len() + self.payload.len()
    }
}

/// A record received from a partition.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// A transport error surfaced from a consumer, with the partition when known.
#[derive(Debug)]
pub struct TransportFault {
    pub partition: Option<i32>,
    pub error: BusError,
}

impl TransportFault {
    pub fn new(partition: Option<i32>, error: BusError) -> Self {
        Self { partition, error }
    }
}

/// Where a transport error was observed.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub topic: String,
    pub consumer_group: String,
    pub partition: Option<i32>,
}

// ============================================================================
// Traits
// ============================================================================

/// Sends batches of records to one topic.
#[async_trait]
pub trait Producer: Send + Sync {
    fn topic(&self) -> &str;

    /// Largest total size a single batch may carry.
    fn max_batch_bytes(&self) -> usize;

    async fn send_batch(&self, records: Vec<OutboundRecord>) -> Result<()>;

    /// Flush and release the connection. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Receives records for one topic on behalf of a consumer group.
#[async_trait]
pub trait Consumer: Send {
    /// Next record or transport error. `None` once the stream has ended.
    async fn recv(&mut self) -> Option<std::result::Result<Delivery, TransportFault>>;

    /// Handle used by partition workers to acknowledge processed records.
    fn acknowledger(&self) -> Arc<dyn Acknowledger>;

    async fn close(&mut self) -> Result<()>;
}

/// Marks a record as processed so it is not redelivered to the group.
pub trait Acknowledger: Send + Sync {
    fn ack(&self, delivery: &Delivery) -> Result<()>;
}

/// Acknowledger for transports without durable offsets.
pub struct NoopAcknowledger;

impl Acknowledger for NoopAcknowledger {
    fn ack(&self, _delivery: &Delivery) -> Result<()> {
        Ok(())
    }
}

/// A log-structured, partitioned transport.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn producer(&self, topic: &str) -> Result<Arc<dyn Producer>>;

    async fn consumer(&self, topic: &str, consumer_group: &str) -> Result<Box<dyn Consumer>>;
}

/// Processes one delivered record.
///
/// Implementations isolate their own failures; the partition advances once
/// this returns.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn on_delivery(&self, delivery: &Delivery);
}

/// Receives transport-level errors for a subscription. Must not panic.
pub trait TransportErrorHandler: Send + Sync {
    fn on_error(&self, error: &BusError, context: &ErrorContext);
}

/// Default error handler: log and continue.
pub struct LogTransportErrors;

impl TransportErrorHandler for LogTransportErrors {
    fn on_error(&self, error: &BusError, context: &ErrorContext) {
        error!(
            topic = %context.topic,
            consumer_group = %context.consumer_group,
            partition = ?context.partition,
            error = %error,
            "Transport error"
        );
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Messaging type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process partitioned channels.
    #[default]
    Channel,
    /// Kafka-compatible log broker.
    Kafka,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// Channel-specific configuration.
    pub channel: ChannelConfig,
    /// Kafka-specific configuration.
    pub kafka: KafkaConfig,
}

/// Channel-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Partitions per topic.
    pub partitions: usize,
    /// Batch size limit reported to the broker client.
    pub max_batch_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            partitions: 3,
            max_batch_bytes: 1024 * 1024,
        }
    }
}

/// Kafka-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Client identifier reported to the brokers.
    pub client_id: String,
    /// Largest batch the producer will hand to the broker.
    pub max_batch_bytes: usize,
    /// Consumer session timeout.
    pub session_timeout_ms: u32,
    /// New consumer groups start from the earliest offset instead of the latest.
    pub from_beginning: bool,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            client_id: "shiksha-relay".to_string(),
            max_batch_bytes: 1_000_000,
            session_timeout_ms: 30_000,
            from_beginning: false,
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize the transport selected by configuration.
///
/// Requires the corresponding feature to be enabled:
/// - Channel: `--features channel` (included in default)
/// - Kafka: `--features kafka`
pub fn init_transport(config: &MessagingConfig) -> Result<Arc<dyn Transport>> {
    match config.messaging_type {
        MessagingType::Channel => {
            #[cfg(feature = "channel")]
            {
                let transport = ChannelTransport::new(config.channel.partitions)
                    .with_max_batch_bytes(config.channel.max_batch_bytes);
                info!(
                    messaging_type = "channel",
                    partitions = config.channel.partitions,
                    "Broker transport initialized"
                );
                Ok(Arc::new(transport))
            }

            #[cfg(not(feature = "channel"))]
            {
                Err(BusError::NotConfigured(
                    "Channel support requires the 'channel' feature. Rebuild with --features channel"
                        .to_string(),
                ))
            }
        }
        MessagingType::Kafka => {
            #[cfg(feature = "kafka")]
            {
                let transport = KafkaTransport::new(KafkaTransportConfig::from(&config.kafka))?;
                info!(
                    messaging_type = "kafka",
                    bootstrap_servers = %config.kafka.bootstrap_servers,
                    "Broker transport initialized"
                );
                Ok(Arc::new(transport))
            }

            #[cfg(not(feature = "kafka"))]
            {
                Err(BusError::NotConfigured(
                    "Kafka support requires the 'kafka' feature. Rebuild with --features kafka"
                        .to_string(),
                ))
            }
        }
    }
}
