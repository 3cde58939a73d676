//! Key-value cache holding derived views such as the course catalog listing.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

/// Cache key of the public course listing.
pub const COURSE_LIST_CACHE_KEY: &str = "courses:all";

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors from the cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache connection failed: {0}")]
    Connection(String),

    #[error("Cache command failed: {0}")]
    Command(String),

    #[error("Cache not configured: {0}")]
    NotConfigured(String),
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// Cache backend discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    #[default]
    Memory,
    Redis,
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(rename = "type")]
    pub cache_type: CacheType,
    /// Redis connection URL.
    pub url: String,
    /// Key deleted when the course catalog changes.
    pub course_list_key: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::Memory,
            url: "redis://localhost:6379".to_string(),
            course_list_key: COURSE_LIST_CACHE_KEY.to_string(),
        }
    }
}

/// Initialize the configured cache.
pub async fn init_cache(config: &CacheConfig) -> Result<Arc<dyn CacheStore>> {
    match config.cache_type {
        CacheType::Memory => {
            info!(cache_type = "memory", "Cache initialized");
            Ok(Arc::new(MemoryCache::new()))
        }
        CacheType::Redis => {
            #[cfg(feature = "redis")]
            {
                let cache = RedisCache::connect(&config.url).await?;
                info!(cache_type = "redis", "Cache initialized");
                Ok(Arc::new(cache))
            }

            #[cfg(not(feature = "redis"))]
            {
                Err(CacheError::NotConfigured(
                    "Redis support requires the 'redis' feature. Rebuild with --features redis"
                        .to_string(),
                ))
            }
        }
    }
}
