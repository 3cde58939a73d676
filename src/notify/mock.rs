//! Recording notification sender.
//!
//! Used when no relay is configured (messages are logged and kept) and in
//! tests.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use super::{Notification, NotificationSender, NotifyError, SendReport};
use crate::utils::mask_email;

#[derive(Default)]
pub struct MockNotificationSender {
    sent: RwLock<Vec<Notification>>,
    fail_on_send: RwLock<bool>,
}

impl MockNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_send(&self, fail: bool) {
        *self.fail_on_send.write().await = fail;
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.read().await.len()
    }
}

#[async_trait]
impl NotificationSender for MockNotificationSender {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<SendReport, NotifyError> {
        if *self.fail_on_send.read().await {
            return Err(NotifyError::Unavailable("simulated relay outage".to_string()));
        }

        let messages = notification.render();
        for message in &messages {
            info!(
                to = %mask_email(&message.to),
                subject = %message.subject,
                "Notification"
            );
        }
        self.sent.write().await.push(notification.clone());

        Ok(SendReport {
            sent: messages.len(),
            skipped: notification.recipients().len() - messages.len(),
        })
    }
}
