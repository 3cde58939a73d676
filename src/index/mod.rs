//! Search index holding chunks derived from course material.
//!
//! The relay only removes entries; ingestion happens downstream of the job
//! queue.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

pub mod http;
pub mod mock;

pub use http::{HttpSearchIndex, HttpIndexConfig};
pub use mock::MockSearchIndex;

/// Errors from the search index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Search index unavailable: {0}")]
    Unavailable(String),

    #[error("Search index rejected request: {0}")]
    Rejected(String),

    #[error("Search index not configured: {0}")]
    Config(String),
}

/// Which chunks to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexFilter {
    VideoId(String),
    NotesId(String),
    SourceUri(String),
}

impl IndexFilter {
    /// Request body: a single-key object such as `{"video_id": "v1"}`.
    pub fn to_body(&self) -> serde_json::Value {
        let (key, value) = match self {
            IndexFilter::VideoId(id) => ("video_id", id),
            IndexFilter::NotesId(id) => ("notes_id", id),
            IndexFilter::SourceUri(uri) => ("source_uri", uri),
        };
        let mut body = serde_json::Map::new();
        body.insert(key.to_string(), serde_json::Value::String(value.clone()));
        serde_json::Value::Object(body)
    }
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    fn name(&self) -> &str;

    async fn delete(&self, filter: &IndexFilter) -> Result<(), IndexError>;
}

/// Search index backend discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// Record deletions in memory only.
    #[default]
    Memory,
    Http,
}

/// Search index configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    #[serde(rename = "type")]
    pub index_type: IndexType,
    pub http: HttpIndexConfig,
}

/// Initialize the configured search index.
pub fn init_search_index(config: &IndexConfig) -> Result<Arc<dyn SearchIndex>, IndexError> {
    match config.index_type {
        IndexType::Memory => {
            info!(index_type = "memory", "Search index initialized");
            Ok(Arc::new(MockSearchIndex::new()))
        }
        IndexType::Http => {
            let index = HttpSearchIndex::new(config.http.clone())?;
            info!(index_type = "http", base_url = %config.http.base_url, "Search index initialized");
            Ok(Arc::new(index))
        }
    }
}
