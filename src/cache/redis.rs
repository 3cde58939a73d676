//! Redis cache using a multiplexed connection manager.

use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;

use super::{CacheError, CacheStore, Result};
use crate::utils::bootstrap::connect_with_retry;

pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            ::redis::Client::open(url).map_err(|e| CacheError::Connection(e.to_string()))?;
        let connection = connect_with_retry("redis", url, || {
            ConnectionManager::new(client.clone())
        })
        .await
        .map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self { connection })
    }
}

fn command_error(e: ::redis::RedisError) -> CacheError {
    CacheError::Command(e.to_string())
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(command_error)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(command_error)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.del(key).await.map_err(command_error)?;
        Ok(removed > 0)
    }
}
