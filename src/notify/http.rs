//! HTTP notification sender.
//!
//! POSTs all rendered messages of a notification as one JSON request to a
//! mail relay endpoint, retrying transient failures with backoff.

use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::{Notification, NotificationSender, NotifyError, RenderedMessage, SendReport};
use crate::utils::mask_email;
use crate::utils::retry::{http_backoff, is_retryable_error, is_retryable_status};

/// HTTP notifier configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpNotifierConfig {
    /// Relay endpoint URL.
    pub endpoint: String,
    /// Sender address.
    pub from: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Bearer token for the relay.
    pub api_token: Option<String>,
}

impl Default for HttpNotifierConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            from: "no-reply@shiksha.local".to_string(),
            timeout_secs: 30,
            api_token: None,
        }
    }
}

impl HttpNotifierConfig {
    /// Set the endpoint URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    messages: &'a [RenderedMessage],
}

pub struct HttpNotificationSender {
    client: Client,
    config: HttpNotifierConfig,
}

impl HttpNotificationSender {
    pub fn new(config: HttpNotifierConfig) -> Result<Self, NotifyError> {
        if config.endpoint.is_empty() {
            return Err(NotifyError::Config(
                "notifier endpoint not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    async fn post(&self, messages: &[RenderedMessage]) -> Result<(), NotifyError> {
        let mut request = self.client.post(&self.config.endpoint).json(&SendRequest {
            from: &self.config.from,
            messages,
        });
        if let Some(ref token) = self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(200).collect();
        if is_retryable_status(status) {
            warn!(status = %status, body = %body, "Notification relay returned retryable status");
            Err(NotifyError::Unavailable(format!("HTTP {} - {}", status, body)))
        } else {
            error!(status = %status, body = %body, "Notification relay rejected request");
            Err(NotifyError::Rejected(format!("HTTP {} - {}", status, body)))
        }
    }
}

#[async_trait]
impl NotificationSender for HttpNotificationSender {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, notification: &Notification) -> Result<SendReport, NotifyError> {
        let messages = notification.render();
        let skipped = notification.recipients().len() - messages.len();
        if messages.is_empty() {
            return Ok(SendReport { sent: 0, skipped });
        }

        (|| async { self.post(&messages).await })
            .retry(http_backoff())
            .when(|e| match e {
                NotifyError::Http(err) => is_retryable_error(err),
                NotifyError::Unavailable(_) => true,
                _ => false,
            })
            .await?;

        debug!(
            kind = notification.kind(),
            recipients = ?messages.iter().map(|m| mask_email(&m.to)).collect::<Vec<_>>(),
            "Notification sent"
        );
        Ok(SendReport {
            sent: messages.len(),
            skipped,
        })
    }
}
