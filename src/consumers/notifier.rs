//! Emails learners about new modules and confirmed payments.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{DeliveryContext, EventConsumer, HandlerError, HandlerResult};
use crate::documents::DocumentStore;
use crate::events::{topics, DomainEvent, ModuleCreated, PaymentDone};
use crate::notify::{Notification, NotificationSender, Recipient};

pub const CONSUMER_GROUP: &str = "email-group";

pub struct Notifier {
    documents: Arc<dyn DocumentStore>,
    sender: Arc<dyn NotificationSender>,
}

impl Notifier {
    pub fn new(documents: Arc<dyn DocumentStore>, sender: Arc<dyn NotificationSender>) -> Self {
        Self { documents, sender }
    }

    async fn module_created(&self, created: &ModuleCreated) -> Result<(), HandlerError> {
        let Some(module) = self.documents.find_module(&created.module_id).await? else {
            warn!(module_id = %created.module_id, "Module not found, nothing to notify");
            return Ok(());
        };
        let Some(course) = self.documents.find_course(&module.course_id).await? else {
            warn!(module_id = %module.id, course_id = %module.course_id, "Course not found, nothing to notify");
            return Ok(());
        };

        if course.students.is_empty() {
            info!(module_id = %module.id, course_id = %course.id, "No students to notify");
            return Ok(());
        }

        let notification = Notification::ModulePublished {
            recipients: course
                .students
                .iter()
                .map(|s| Recipient {
                    name: s.name.clone(),
                    email: s.email.clone(),
                })
                .collect(),
            course_name: course.name,
            teacher_name: course.teacher_name,
            module_title: module.title,
            module_description: module.description,
        };
        let report = self.sender.send(&notification).await?;
        info!(
            module_id = %module.id,
            sent = report.sent,
            skipped = report.skipped,
            "Module notification sent"
        );
        Ok(())
    }

    async fn payment_done(&self, payment: &PaymentDone) -> Result<(), HandlerError> {
        let user = self.documents.find_user(&payment.user_id).await?;
        let course = self.documents.find_course(&payment.course_id).await?;
        let (Some(user), Some(course)) = (user, course) else {
            warn!(
                user_id = %payment.user_id,
                course_id = %payment.course_id,
                "User or course not found, no payment confirmation"
            );
            return Ok(());
        };

        let notification = Notification::PaymentConfirmed {
            recipient: Recipient {
                name: user.name,
                email: user.email,
            },
            course_name: course.name,
            price: course.price,
        };
        let report = self.sender.send(&notification).await?;
        info!(
            user_id = %user.id,
            course_id = %course.id,
            sent = report.sent,
            "Payment confirmation sent"
        );
        Ok(())
    }
}

#[async_trait]
impl EventConsumer for Notifier {
    fn name(&self) -> &'static str {
        "notifier"
    }

    fn topics(&self) -> &'static [&'static str] {
        &[topics::MODULE_CREATED, topics::PAYMENT_DONE]
    }

    fn default_group(&self) -> &'static str {
        CONSUMER_GROUP
    }

    async fn handle(&self, event: &DomainEvent, _ctx: &DeliveryContext) -> HandlerResult {
        match event {
            DomainEvent::ModuleCreated(created) => self.module_created(created).await.into(),
            DomainEvent::PaymentDone(payment) => self.payment_done(payment).await.into(),
            _ => HandlerResult::Ok,
        }
    }
}
