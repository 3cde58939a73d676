//! Recording search index for standalone mode and tests.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use super::{IndexError, IndexFilter, SearchIndex};

#[derive(Default)]
pub struct MockSearchIndex {
    deleted: RwLock<Vec<IndexFilter>>,
    fail_on_delete: RwLock<bool>,
}

impl MockSearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_delete(&self, fail: bool) {
        *self.fail_on_delete.write().await = fail;
    }

    pub async fn deleted(&self) -> Vec<IndexFilter> {
        self.deleted.read().await.clone()
    }
}

#[async_trait]
impl SearchIndex for MockSearchIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn delete(&self, filter: &IndexFilter) -> Result<(), IndexError> {
        if *self.fail_on_delete.read().await {
            return Err(IndexError::Unavailable("simulated index outage".to_string()));
        }
        info!(filter = ?filter, "Search index delete recorded");
        self.deleted.write().await.push(filter.clone());
        Ok(())
    }
}
