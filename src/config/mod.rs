//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

use serde::Deserialize;

use crate::blob::{BlobConfig, BlobType};
use crate::bus::{MessagingConfig, MessagingType};
use crate::cache::{CacheConfig, CacheType};
use crate::consumers::ConsumersConfig;
use crate::documents::{DocumentsConfig, DocumentsType};
use crate::index::{IndexConfig, IndexType};
use crate::ingest::{AccessConfig, QueueConfig};
use crate::lifecycle::LifecycleConfig;
use crate::notify::{NotifierConfig, NotifierType};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "SHIKSHA_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "SHIKSHA";

/// Configuration errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker configuration. Absent means publish and subscribe report
    /// `NotConfigured`.
    pub messaging: Option<MessagingConfig>,
    pub documents: DocumentsConfig,
    pub cache: CacheConfig,
    pub blob: BlobConfig,
    /// Blob signing credentials.
    pub access: AccessConfig,
    /// Ingestion job queue. Absent means enqueue reports `NotConfigured`.
    pub queue: Option<QueueConfig>,
    pub notifier: NotifierConfig,
    pub index: IndexConfig,
    pub consumers: ConsumersConfig,
    pub lifecycle: LifecycleConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, `__` separated
    ///    (e.g. `SHIKSHA__MESSAGING__KAFKA__BOOTSTRAP_SERVERS`)
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that select a backend without its endpoint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(messaging) = &self.messaging {
            if messaging.messaging_type == MessagingType::Kafka
                && messaging.kafka.bootstrap_servers.trim().is_empty()
            {
                return Err(invalid("messaging.kafka.bootstrap_servers is required"));
            }
            if messaging.messaging_type == MessagingType::Channel && messaging.channel.partitions == 0 {
                return Err(invalid("messaging.channel.partitions must be at least 1"));
            }
        }
        if self.documents.documents_type == DocumentsType::Mongodb && self.documents.uri.is_empty() {
            return Err(invalid("documents.uri is required for mongodb"));
        }
        if self.cache.cache_type == CacheType::Redis && self.cache.url.is_empty() {
            return Err(invalid("cache.url is required for redis"));
        }
        if self.blob.blob_type == BlobType::S3 && self.blob.bucket.is_empty() {
            return Err(invalid("blob.bucket is required for s3"));
        }
        if let Some(queue) = &self.queue {
            if queue.queue_name.trim().is_empty() {
                return Err(invalid("queue.queue_name must not be empty"));
            }
        }
        if self.notifier.notifier_type == NotifierType::Http && self.notifier.http.endpoint.is_empty() {
            return Err(invalid("notifier.http.endpoint is required for http"));
        }
        if self.index.index_type == IndexType::Http && self.index.http.base_url.is_empty() {
            return Err(invalid("index.http.base_url is required for http"));
        }
        Ok(())
    }

    /// Create config for testing: in-memory everything, channel broker and
    /// memory job queue.
    pub fn for_test() -> Self {
        Self {
            messaging: Some(MessagingConfig::default()),
            queue: Some(QueueConfig::default()),
            blob: BlobConfig {
                blob_type: BlobType::Memory,
                ..BlobConfig::default()
            },
            access: AccessConfig {
                account_name: "shiksha".to_string(),
                account_key: None,
                base_url: None,
            },
            ..Self::default()
        }
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.messaging.is_none());
        assert!(config.queue.is_none());
        assert_eq!(config.documents.documents_type, DocumentsType::Memory);
        assert_eq!(config.lifecycle.drain_timeout_ms, 5_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
messaging:
  type: kafka
  kafka:
    bootstrap_servers: broker:9092
queue:
  type: memory
  queue_name: jobs
blob:
  type: filesystem
  base_path: /tmp/blobs
consumers:
  enabled: [enrollment, cache_invalidator]
  groups:
    enrollment: add_course-group-v2
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let messaging = config.messaging.as_ref().unwrap();
        assert_eq!(messaging.messaging_type, MessagingType::Kafka);
        assert_eq!(messaging.kafka.bootstrap_servers, "broker:9092");
        assert_eq!(config.queue.as_ref().unwrap().queue_name, "jobs");
        assert_eq!(config.blob.base_path, "/tmp/blobs");
        assert_eq!(config.consumers.enabled.len(), 2);
        assert_eq!(
            config.consumers.groups.get("enrollment").map(String::as_str),
            Some("add_course-group-v2")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_endpoints() {
        let mut config = Config::for_test();
        config.notifier.notifier_type = NotifierType::Http;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::for_test();
        if let Some(messaging) = config.messaging.as_mut() {
            messaging.messaging_type = MessagingType::Kafka;
            messaging.kafka.bootstrap_servers = String::new();
        }
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_from_env() {
        std::env::set_var("SHIKSHA__CACHE__COURSE_LIST_KEY", "courses:v2");
        std::env::set_var("SHIKSHA__LIFECYCLE__DRAIN_TIMEOUT_MS", "250");
        let config = Config::load(None);
        std::env::remove_var("SHIKSHA__CACHE__COURSE_LIST_KEY");
        std::env::remove_var("SHIKSHA__LIFECYCLE__DRAIN_TIMEOUT_MS");

        let config = config.unwrap();
        assert_eq!(config.cache.course_list_key, "courses:v2");
        assert_eq!(config.lifecycle.drain_timeout_ms, 250);
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.yaml");
        std::fs::write(&path, "documents:\n  database: shiksha_test\n").unwrap();

        let config = Config::load(path.to_str()).unwrap();
        assert_eq!(config.documents.database, "shiksha_test");
    }
}
