//! Learner notifications.
//!
//! A [`Notification`] carries everything needed to render its messages; the
//! sender decides how they travel. Recipients with malformed addresses are
//! dropped before sending, and every interpolated value is HTML-escaped.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

pub mod http;
pub mod mock;

pub use http::{HttpNotificationSender, HttpNotifierConfig};
pub use mock::MockNotificationSender;

/// Errors from notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification service unavailable: {0}")]
    Unavailable(String),

    #[error("Notification rejected: {0}")]
    Rejected(String),

    #[error("Notifier not configured: {0}")]
    Config(String),
}

/// A named email recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub name: String,
    pub email: String,
}

/// Something to tell learners.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A module was added to a course the recipients are enrolled in.
    ModulePublished {
        recipients: Vec<Recipient>,
        course_name: String,
        teacher_name: Option<String>,
        module_title: String,
        module_description: String,
    },
    /// A learner's payment was recorded.
    PaymentConfirmed {
        recipient: Recipient,
        course_name: String,
        price: f64,
    },
}

/// One rendered email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::ModulePublished { .. } => "module_published",
            Notification::PaymentConfirmed { .. } => "payment_confirmed",
        }
    }

    /// All recipients, valid or not.
    pub fn recipients(&self) -> Vec<&Recipient> {
        match self {
            Notification::ModulePublished { recipients, .. } => recipients.iter().collect(),
            Notification::PaymentConfirmed { recipient, .. } => vec![recipient],
        }
    }

    pub fn subject(&self) -> String {
        match self {
            Notification::ModulePublished {
                course_name,
                module_title,
                ..
            } => format!("New Module Added: {module_title} - {course_name}"),
            Notification::PaymentConfirmed { course_name, .. } => {
                format!("Enrollment Confirmed: {course_name}")
            }
        }
    }

    /// Render one message per recipient with a valid address.
    pub fn render(&self) -> Vec<RenderedMessage> {
        let subject = self.subject();
        self.recipients()
            .into_iter()
            .filter(|r| is_valid_email(&r.email))
            .map(|r| RenderedMessage {
                to: r.email.clone(),
                subject: subject.clone(),
                html: self.render_body(r),
            })
            .collect()
    }

    fn render_body(&self, recipient: &Recipient) -> String {
        let greeting = if recipient.name.trim().is_empty() {
            "Student".to_string()
        } else {
            escape_html(&recipient.name)
        };

        match self {
            Notification::ModulePublished {
                course_name,
                teacher_name,
                module_title,
                module_description,
                ..
            } => {
                let description = if module_description.trim().is_empty() {
                    "No description available".to_string()
                } else {
                    escape_html(module_description)
                };
                let teacher = teacher_name
                    .as_deref()
                    .filter(|t| !t.trim().is_empty())
                    .map(escape_html)
                    .unwrap_or_else(|| "Unknown".to_string());
                format!(
                    "<h1>New Module Available</h1>\
                     <p>Hi {greeting},</p>\
                     <p>A new module has been added to your enrolled course:</p>\
                     <h3>{title}</h3>\
                     <p>{description}</p>\
                     <p><strong>Course:</strong> {course}</p>\
                     <p><strong>Instructor:</strong> {teacher}</p>",
                    title = escape_html(module_title),
                    course = escape_html(course_name),
                )
            }
            Notification::PaymentConfirmed {
                course_name, price, ..
            } => {
                let amount = if *price > 0.0 {
                    format!("<p>Amount Paid: &#8377;{price}</p>")
                } else {
                    String::new()
                };
                format!(
                    "<h1>Enrollment Successful!</h1>\
                     <p>Hi {greeting},</p>\
                     <p>Congratulations! You have successfully enrolled in:</p>\
                     <h3>{course}</h3>{amount}\
                     <p>You now have full access to all course materials.</p>",
                    course = escape_html(course_name),
                )
            }
        }
    }
}

/// Outcome of a send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    pub sent: usize,
    pub skipped: usize,
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver all messages of `notification` in one call to the provider.
    async fn send(&self, notification: &Notification) -> Result<SendReport, NotifyError>;
}

/// Loose address check: one `@`, non-empty local part, dotted domain, no
/// whitespace.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Escape text for interpolation into HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// Notifier backend discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierType {
    /// Log and discard.
    #[default]
    Log,
    Http,
}

/// Notifier configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    #[serde(rename = "type")]
    pub notifier_type: NotifierType,
    pub http: HttpNotifierConfig,
}

/// Initialize the configured notification sender.
pub fn init_notifier(config: &NotifierConfig) -> Result<Arc<dyn NotificationSender>, NotifyError> {
    match config.notifier_type {
        NotifierType::Log => {
            info!(notifier_type = "log", "Notifier initialized");
            Ok(Arc::new(MockNotificationSender::new()))
        }
        NotifierType::Http => {
            let sender = HttpNotificationSender::new(config.http.clone())?;
            info!(notifier_type = "http", endpoint = %config.http.endpoint, "Notifier initialized");
            Ok(Arc::new(sender))
        }
    }
}
