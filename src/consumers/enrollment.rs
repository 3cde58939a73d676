//! Enrollment writer: records a paid learner on the course and the course on
//! the learner.
//!
//! The course write is conditional on the learner not being enrolled yet, so
//! a redelivered `payment_done` appends and charges once. The user write is a
//! set-add run on every delivery, which repairs a user record left behind if
//! a previous delivery stopped between the two writes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{DeliveryContext, EventConsumer, HandlerError, HandlerResult};
use crate::documents::DocumentStore;
use crate::events::{topics, DomainEvent, PaymentDone};

pub const CONSUMER_GROUP: &str = "add_course-group";

pub struct EnrollmentWriter {
    documents: Arc<dyn DocumentStore>,
}

impl EnrollmentWriter {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    async fn enroll(&self, payment: &PaymentDone) -> Result<(), HandlerError> {
        let user = self.documents.find_user(&payment.user_id).await?;
        let course = self.documents.find_course(&payment.course_id).await?;

        let (Some(user), Some(course)) = (user, course) else {
            info!(
                user_id = %payment.user_id,
                course_id = %payment.course_id,
                "User or course not found, skipping enrollment"
            );
            return Ok(());
        };

        if course.has_student(&user.id) {
            debug!(user_id = %user.id, course_id = %course.id, "Already enrolled");
        } else {
            let applied = self
                .documents
                .enroll_student(&course.id, &user.as_student(), course.price)
                .await?;
            if applied {
                info!(
                    user_id = %user.id,
                    course_id = %course.id,
                    price = course.price,
                    "Student enrolled"
                );
            }
        }

        self.documents.add_course_to_user(&user.id, &course.id).await?;
        Ok(())
    }
}

#[async_trait]
impl EventConsumer for EnrollmentWriter {
    fn name(&self) -> &'static str {
        "enrollment"
    }

    fn topics(&self) -> &'static [&'static str] {
        &[topics::PAYMENT_DONE]
    }

    fn default_group(&self) -> &'static str {
        CONSUMER_GROUP
    }

    async fn handle(&self, event: &DomainEvent, _ctx: &DeliveryContext) -> HandlerResult {
        match event {
            DomainEvent::PaymentDone(payment) => self.enroll(payment).await.into(),
            _ => HandlerResult::Ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::MemoryDocumentStore;
    use crate::test_utils::{course, delivery_context, user};

    async fn store() -> Arc<MemoryDocumentStore> {
        let store = Arc::new(MemoryDocumentStore::new());
        store.insert_course(course("c1", "Rust 101", 499.0)).await;
        store.insert_user(user("u1", "Asha", "asha@example.com")).await;
        store
    }

    #[tokio::test]
    async fn test_payment_enrolls_once() {
        let store = store().await;
        let writer = EnrollmentWriter::new(store.clone());
        let ctx = delivery_context(topics::PAYMENT_DONE);
        let event = DomainEvent::payment_done("c1", "u1");

        assert!(writer.handle(&event, &ctx).await.is_ok());
        assert!(writer.handle(&event, &ctx).await.is_ok());

        let course = store.find_course("c1").await.unwrap().unwrap();
        assert_eq!(course.students.len(), 1);
        assert_eq!(course.student_count, 1);
        assert_eq!(course.total_earned, 499.0);

        let user = store.find_user("u1").await.unwrap().unwrap();
        assert_eq!(user.courses, vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_entities_are_noops() {
        let store = store().await;
        let writer = EnrollmentWriter::new(store.clone());
        let ctx = delivery_context(topics::PAYMENT_DONE);

        assert!(writer
            .handle(&DomainEvent::payment_done("c1", "ghost"), &ctx)
            .await
            .is_ok());
        assert!(writer
            .handle(&DomainEvent::payment_done("gone", "u1"), &ctx)
            .await
            .is_ok());

        let course = store.find_course("c1").await.unwrap().unwrap();
        assert_eq!(course.student_count, 0);
        assert!(store.find_user("u1").await.unwrap().unwrap().courses.is_empty());
    }

    #[tokio::test]
    async fn test_redelivery_repairs_user_record() {
        let store = store().await;
        let mut enrolled = course("c1", "Rust 101", 499.0);
        enrolled.students.push(user("u1", "Asha", "asha@example.com").as_student());
        enrolled.student_count = 1;
        store.insert_course(enrolled).await;

        let writer = EnrollmentWriter::new(store.clone());
        writer
            .handle(
                &DomainEvent::payment_done("c1", "u1"),
                &delivery_context(topics::PAYMENT_DONE),
            )
            .await;

        assert_eq!(store.find_course("c1").await.unwrap().unwrap().student_count, 1);
        assert_eq!(
            store.find_user("u1").await.unwrap().unwrap().courses,
            vec!["c1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_store_outage_is_handled() {
        let store = store().await;
        store.set_fail_reads(true).await;
        let writer = EnrollmentWriter::new(store);

        let result = writer
            .handle(
                &DomainEvent::payment_done("c1", "u1"),
                &delivery_context(topics::PAYMENT_DONE),
            )
            .await;
        assert!(matches!(
            result,
            HandlerResult::Handled(HandlerError::Documents(_))
        ));
    }
}
