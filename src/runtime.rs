//! Process wiring.
//!
//! Builds every collaborator from [`Config`], owns the resource registry and
//! broker client, starts the enabled consumers and drains everything on a
//! shutdown signal.

use std::sync::Arc;

use tracing::{info, warn};

use crate::blob::{self, BlobError, BlobStore};
use crate::bus::{
    self, BrokerClient, BusError, LogTransportErrors, SubscribeError, Transport,
    TransportErrorHandler,
};
use crate::cache::{self, CacheError, CacheStore};
use crate::config::{Config, ConfigError};
use crate::consumers::{
    start_consumer, CacheInvalidator, ConsumerKind, ContentPropagator, CourseCleanup,
    EnrollmentWriter, EventConsumer, Notifier,
};
use crate::documents::{self, DocumentError, DocumentStore};
use crate::index::{self, IndexError, SearchIndex};
use crate::ingest::{
    self, AccessError, AccessSigner, Containers, IngestionPipeline, JobQueue, QueueError,
};
use crate::lifecycle::{DrainReport, ResourceRegistry};
use crate::notify::{self, NotificationSender, NotifyError};
use crate::utils::bootstrap::shutdown_signal;

/// Startup failures. All are fatal.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("broker: {0}")]
    Bus(#[from] BusError),

    #[error("subscribe: {0}")]
    Subscribe(#[from] SubscribeError),

    #[error("document store: {0}")]
    Documents(#[from] DocumentError),

    #[error("cache: {0}")]
    Cache(#[from] CacheError),

    #[error("blob store: {0}")]
    Blob(#[from] BlobError),

    #[error("signed access: {0}")]
    Access(#[from] AccessError),

    #[error("job queue: {0}")]
    Queue(#[from] QueueError),

    #[error("notifier: {0}")]
    Notify(#[from] NotifyError),

    #[error("search index: {0}")]
    Index(#[from] IndexError),
}

/// External collaborators the consumers and pipeline call into.
#[derive(Clone)]
pub struct Collaborators {
    pub documents: Arc<dyn DocumentStore>,
    pub cache: Arc<dyn CacheStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub notifier: Arc<dyn NotificationSender>,
    pub index: Arc<dyn SearchIndex>,
}

impl Collaborators {
    /// Initialize every configured backend.
    pub async fn init(config: &Config) -> Result<Self, RuntimeError> {
        Ok(Self {
            documents: documents::init_document_store(&config.documents).await?,
            cache: cache::init_cache(&config.cache).await?,
            blobs: blob::init_blob_store(&config.blob).await?,
            queue: ingest::init_job_queue(config.queue.as_ref()).await?,
            notifier: notify::init_notifier(&config.notifier)?,
            index: index::init_search_index(&config.index)?,
        })
    }
}

pub struct Runtime {
    config: Config,
    registry: Arc<ResourceRegistry>,
    client: BrokerClient,
    collaborators: Collaborators,
    pipeline: IngestionPipeline,
    on_error: Arc<dyn TransportErrorHandler>,
}

impl Runtime {
    /// Build the runtime from configuration.
    pub async fn build(config: Config) -> Result<Self, RuntimeError> {
        config.validate()?;
        let transport = match &config.messaging {
            Some(messaging) => Some(bus::init_transport(messaging)?),
            None => {
                warn!("No messaging configured; publish and subscribe are disabled");
                None
            }
        };
        let collaborators = Collaborators::init(&config).await?;
        Self::with_collaborators(config, transport, collaborators).await
    }

    /// Build the runtime around an existing transport and collaborators.
    pub async fn with_collaborators(
        config: Config,
        transport: Option<Arc<dyn Transport>>,
        collaborators: Collaborators,
    ) -> Result<Self, RuntimeError> {
        let registry = Arc::new(ResourceRegistry::with_drain_timeout(
            config.lifecycle.drain_timeout(),
        ));
        registry.start().await;

        let client = match transport {
            Some(transport) => BrokerClient::new(transport, registry.clone()),
            None => BrokerClient::unconfigured(registry.clone()),
        };

        let signer = AccessSigner::new(&config.access, Containers::from(&config.blob))?;
        let pipeline = IngestionPipeline::new(
            collaborators.blobs.clone(),
            signer,
            collaborators.queue.clone(),
        );

        Ok(Self {
            config,
            registry,
            client,
            collaborators,
            pipeline,
            on_error: Arc::new(LogTransportErrors),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &BrokerClient {
        &self.client
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.pipeline
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Construct one of the shipped consumers.
    pub fn consumer(&self, kind: ConsumerKind) -> Arc<dyn EventConsumer> {
        let c = &self.collaborators;
        match kind {
            ConsumerKind::Enrollment => Arc::new(EnrollmentWriter::new(c.documents.clone())),
            ConsumerKind::CacheInvalidator => Arc::new(CacheInvalidator::new(
                c.cache.clone(),
                self.config.cache.course_list_key.clone(),
            )),
            ConsumerKind::CourseCleanup => Arc::new(CourseCleanup::new(c.documents.clone())),
            ConsumerKind::Content => Arc::new(ContentPropagator::new(
                self.pipeline.clone(),
                c.blobs.clone(),
                c.index.clone(),
            )),
            ConsumerKind::Notifier => {
                Arc::new(Notifier::new(c.documents.clone(), c.notifier.clone()))
            }
        }
    }

    /// Subscribe every enabled consumer. Returns the number of subscriptions.
    pub async fn start_consumers(&self) -> Result<usize, RuntimeError> {
        if !self.client.is_configured() {
            warn!("No broker configured, consumers not started");
            return Ok(0);
        }

        let mut subscriptions = 0;
        for kind in &self.config.consumers.enabled {
            let consumer = self.consumer(*kind);
            let group = self.config.consumers.group_for(consumer.as_ref()).to_string();
            let handles =
                start_consumer(&self.client, consumer, &group, self.on_error.clone()).await?;
            subscriptions += handles.len();
        }

        info!(
            consumers = self.config.consumers.enabled.len(),
            subscriptions,
            "Consumers running"
        );
        Ok(subscriptions)
    }

    /// Close every producer and subscription.
    pub async fn shutdown(&self) -> DrainReport {
        self.registry.close_all().await
    }

    /// Start consumers, wait for SIGINT or SIGTERM, then drain.
    pub async fn run_until_shutdown(&self) -> Result<DrainReport, RuntimeError> {
        self.start_consumers().await?;
        shutdown_signal().await;
        Ok(self.shutdown().await)
    }
}
