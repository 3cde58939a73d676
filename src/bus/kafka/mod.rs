//! Kafka transport.
//!
//! Topics map one-to-one onto Kafka topics. Records are keyed by partition
//! key, so Kafka's partitioner keeps each subject on one partition.
//! Consumers join a consumer group; offsets are stored after each record is
//! handled and committed in the background.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rdkafka::consumer::{Consumer as _, StreamConsumer};
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::{debug, info};

use super::{
    Acknowledger, BusError, Consumer, Delivery, KafkaConfig, OutboundRecord, Producer, Result,
    Transport, TransportFault,
};

/// How long a send may wait for room in the local queue.
const QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long close waits for buffered records to flush.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for Kafka connections.
#[derive(Clone, Debug)]
pub struct KafkaTransportConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Client identifier.
    pub client_id: String,
    /// Batch size limit reported to the broker client.
    pub max_batch_bytes: usize,
    /// Consumer session timeout.
    pub session_timeout_ms: u32,
    /// New groups start at the earliest offset instead of the latest.
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

impl KafkaTransportConfig {
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self::from(&KafkaConfig {
            bootstrap_servers: bootstrap_servers.into(),
            ..KafkaConfig::default()
        })
    }

    /// Add SASL authentication.
    pub fn with_sasl(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        mechanism: impl Into<String>,
    ) -> Self {
        self.sasl_username = Some(username.into());
        self.sasl_password = Some(password.into());
        self.sasl_mechanism = Some(mechanism.into());
        self.security_protocol = Some("SASL_SSL".to_string());
        self
    }

    /// Set security protocol.
    pub fn with_security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    /// Set SSL CA certificate location.
    pub fn with_ssl_ca(mut self, ca_location: impl Into<String>) -> Self {
        self.ssl_ca_location = Some(ca_location.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn from_beginning(mut self, from_beginning: bool) -> Self {
        self.from_beginning = from_beginning;
        self
    }

    /// Build a ClientConfig for producers.
    fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("client.id", &self.client_id);
        config.set("message.timeout.ms", "5000");
        config.set("message.max.bytes", self.max_batch_bytes.to_string());
        config.set("acks", "all");
        config.set("enable.idempotence", "true");

        self.apply_security_config(&mut config);
        config
    }

    /// Build a ClientConfig for consumers in `group_id`.
    fn build_consumer_config(&self, group_id: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("client.id", &self.client_id);
        config.set("group.id", group_id);
        config.set("session.timeout.ms", self.session_timeout_ms.to_string());
        config.set("enable.auto.commit", "true");
        config.set("enable.auto.offset.store", "false");
        config.set(
            "auto.offset.reset",
            if self.from_beginning { "earliest" } else { "latest" },
        );

        self.apply_security_config(&mut config);
        config
    }

    /// Apply security settings to a ClientConfig.
    fn apply_security_config(&self, config: &mut ClientConfig) {
        if let Some(ref protocol) = self.security_protocol {
            config.set("security.protocol", protocol);
        }

        if let Some(ref mechanism) = self.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }

        if let Some(ref username) = self.sasl_username {
            config.set("sasl.username", username);
        }

        if let Some(ref password) = self.sasl_password {
            config.set("sasl.password", password);
        }

        if let Some(ref ca_location) = self.ssl_ca_location {
            config.set("ssl.ca.location", ca_location);
        }
    }
}

impl From<&KafkaConfig> for KafkaTransportConfig {
    fn from(config: &KafkaConfig) -> Self {
        let mut cfg = Self {
            bootstrap_servers: config.bootstrap_servers.clone(),
            client_id: config.client_id.clone(),
            max_batch_bytes: config.max_batch_bytes,
            session_timeout_ms: config.session_timeout_ms,
            from_beginning: config.from_beginning,
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        };

        if let (Some(user), Some(pass), Some(mechanism)) = (
            &config.sasl_username,
            &config.sasl_password,
            &config.sasl_mechanism,
        ) {
            cfg = cfg.with_sasl(user, pass, mechanism);
        }

        if let Some(ref protocol) = config.security_protocol {
            cfg = cfg.with_security_protocol(protocol);
        }

        if let Some(ref ca) = config.ssl_ca_location {
            cfg = cfg.with_ssl_ca(ca);
        }

        cfg
    }
}

/// Kafka transport.
pub struct KafkaTransport {
    config: KafkaTransportConfig,
}

impl KafkaTransport {
    pub fn new(config: KafkaTransportConfig) -> Result<Self> {
        if config.bootstrap_servers.trim().is_empty() {
            return Err(BusError::NotConfigured(
                "kafka bootstrap_servers is empty".to_string(),
            ));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &KafkaTransportConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn producer(&self, topic: &str) -> Result<Arc<dyn Producer>> {
        let producer: FutureProducer = self
            .config
            .build_producer_config()
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka producer: {}", e)))?;

        info!(
            bootstrap_servers = %self.config.bootstrap_servers,
            topic = %topic,
            "Kafka producer created"
        );

        Ok(Arc::new(KafkaProducer {
            topic: topic.to_string(),
            producer,
            max_batch_bytes: self.config.max_batch_bytes,
        }))
    }

    async fn consumer(&self, topic: &str, consumer_group: &str) -> Result<Box<dyn Consumer>> {
        let consumer: StreamConsumer = self
            .config
            .build_consumer_config(consumer_group)
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka consumer: {}", e)))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| BusError::Subscribe(format!("Failed to subscribe to {}: {}", topic, e)))?;

        info!(
            topic = %topic,
            consumer_group = %consumer_group,
            from_beginning = self.config.from_beginning,
            "Subscribed to Kafka topic"
        );

        Ok(Box::new(KafkaConsumer {
            consumer: Arc::new(consumer),
        }))
    }
}

/// Producer for one Kafka topic.
pub struct KafkaProducer {
    topic: String,
    producer: FutureProducer,
    max_batch_bytes: usize,
}

#[async_trait]
impl Producer for KafkaProducer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn max_batch_bytes(&self) -> usize {
        self.max_batch_bytes
    }

    async fn send_batch(&self, records: Vec<OutboundRecord>) -> Result<()> {
        let sends = records.iter().map(|record| {
            let future_record = FutureRecord::to(&self.topic)
                .key(&record.key)
                .payload(&record.payload);
            self.producer.send(future_record, QUEUE_TIMEOUT)
        });

        for result in join_all(sends).await {
            let (partition, offset) = result
                .map_err(|(e, _)| BusError::Publish(format!("Failed to publish: {}", e)))?;
            debug!(topic = %self.topic, partition, offset, "Record delivered to Kafka");
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.producer
            .flush(Timeout::After(FLUSH_TIMEOUT))
            .map_err(|e| BusError::Connection(format!("Failed to flush producer: {}", e)))
    }
}

/// Consumer-group member for one Kafka topic.
pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
}

#[async_trait]
impl Consumer for KafkaConsumer {
    async fn recv(&mut self) -> Option<std::result::Result<Delivery, TransportFault>> {
        let item = match self.consumer.recv().await {
            Ok(message) => Ok(Delivery {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message
                    .key()
                    .map(|k| String::from_utf8_lossy(k).into_owned()),
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            }),
            Err(e) => Err(TransportFault::new(
                None,
                BusError::Subscribe(format!("Kafka consumer error: {}", e)),
            )),
        };
        Some(item)
    }

    fn acknowledger(&self) -> Arc<dyn Acknowledger> {
        Arc::new(KafkaAcknowledger {
            consumer: self.consumer.clone(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.consumer.unsubscribe();
        Ok(())
    }
}

struct KafkaAcknowledger {
    consumer: Arc<StreamConsumer>,
}

impl Acknowledger for KafkaAcknowledger {
    fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.consumer
            .store_offset(&delivery.topic, delivery.partition, delivery.offset)
            .map_err(|e| BusError::Ack(format!("Failed to store offset: {}", e)))
    }
}
