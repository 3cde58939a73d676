//! HTTP client for the retrieval service's delete endpoint.

use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{IndexError, IndexFilter, SearchIndex};
use crate::utils::retry::{http_backoff, is_retryable_error, is_retryable_status};

/// Path of the delete endpoint, relative to the base URL.
const DELETE_PATH: &str = "/api/rag/delete";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpIndexConfig {
    /// Base URL of the retrieval service.
    pub base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HttpIndexConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: 60,
        }
    }
}

pub struct HttpSearchIndex {
    client: Client,
    delete_url: String,
}

impl HttpSearchIndex {
    pub fn new(config: HttpIndexConfig) -> Result<Self, IndexError> {
        if config.base_url.is_empty() {
            return Err(IndexError::Config("index base_url not configured".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            delete_url: delete_url(&config.base_url),
        })
    }

    async fn delete_once(&self, filter: &IndexFilter) -> Result<(), IndexError> {
        let response = self
            .client
            .delete(&self.delete_url)
            .json(&filter.to_body())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(200)
            .collect();
        if is_retryable_status(status) {
            warn!(status = %status, body = %body, "Search index returned retryable status");
            Err(IndexError::Unavailable(format!("HTTP {} - {}", status, body)))
        } else {
            Err(IndexError::Rejected(format!("HTTP {} - {}", status, body)))
        }
    }
}

fn delete_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), DELETE_PATH)
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    fn name(&self) -> &str {
        "http"
    }

    async fn delete(&self, filter: &IndexFilter) -> Result<(), IndexError> {
        (|| async { self.delete_once(filter).await })
            .retry(http_backoff())
            .when(|e| match e {
                IndexError::Http(err) => is_retryable_error(err),
                IndexError::Unavailable(_) => true,
                _ => false,
            })
            .await?;

        debug!(filter = ?filter, "Search index entries deleted");
        Ok(())
    }
}
