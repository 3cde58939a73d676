//! Removes a deleted course from every user's course list.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{DeliveryContext, EventConsumer, HandlerError, HandlerResult};
use crate::documents::DocumentStore;
use crate::events::{topics, DomainEvent};

pub const CONSUMER_GROUP: &str = "delete_course-group";

pub struct CourseCleanup {
    documents: Arc<dyn DocumentStore>,
}

impl CourseCleanup {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    async fn cleanup(&self, course_id: &str) -> Result<(), HandlerError> {
        let users = self.documents.remove_course_from_users(course_id).await?;
        info!(course_id = %course_id, users, "Removed deleted course from users");
        Ok(())
    }
}

#[async_trait]
impl EventConsumer for CourseCleanup {
    fn name(&self) -> &'static str {
        "course_cleanup"
    }

    fn topics(&self) -> &'static [&'static str] {
        &[topics::COURSE]
    }

    fn default_group(&self) -> &'static str {
        CONSUMER_GROUP
    }

    async fn handle(&self, event: &DomainEvent, _ctx: &DeliveryContext) -> HandlerResult {
        match event {
            DomainEvent::CourseDeleted(course) => self.cleanup(&course.course_id).await.into(),
            _ => HandlerResult::Ok,
        }
    }
}
