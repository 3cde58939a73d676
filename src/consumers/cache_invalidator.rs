//! Evicts the course listing from the cache whenever a course changes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{DeliveryContext, EventConsumer, HandlerError, HandlerResult};
use crate::cache::CacheStore;
use crate::events::{topics, DomainEvent};

pub const CONSUMER_GROUP: &str = "update_redis-group";

pub struct CacheInvalidator {
    cache: Arc<dyn CacheStore>,
    key: String,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<dyn CacheStore>, key: impl Into<String>) -> Self {
        Self {
            cache,
            key: key.into(),
        }
    }

    async fn evict(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        let existed = self.cache.delete(&self.key).await?;
        info!(
            key = %self.key,
            existed,
            event_kind = %event.kind(),
            course_id = %event.partition_key(),
            "Course cache invalidated"
        );
        Ok(())
    }
}

#[async_trait]
impl EventConsumer for CacheInvalidator {
    fn name(&self) -> &'static str {
        "cache_invalidator"
    }

    fn topics(&self) -> &'static [&'static str] {
        &[topics::COURSE]
    }

    fn default_group(&self) -> &'static str {
        CONSUMER_GROUP
    }

    async fn handle(&self, event: &DomainEvent, _ctx: &DeliveryContext) -> HandlerResult {
        match event {
            DomainEvent::CourseCreated(_)
            | DomainEvent::CourseUpdated(_)
            | DomainEvent::CourseDeleted(_) => self.evict(event).await.into(),
            _ => HandlerResult::Ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, COURSE_LIST_CACHE_KEY};
    use crate::test_utils::delivery_context;

    #[tokio::test]
    async fn test_every_course_change_evicts() {
        let cache = Arc::new(MemoryCache::new());
        let invalidator = CacheInvalidator::new(cache.clone(), COURSE_LIST_CACHE_KEY);
        let ctx = delivery_context(topics::COURSE);

        for event in [
            DomainEvent::course_created("c1"),
            DomainEvent::course_updated("c1"),
            DomainEvent::course_deleted("c1"),
        ] {
            cache.set(COURSE_LIST_CACHE_KEY, "[]").await.unwrap();
            assert!(invalidator.handle(&event, &ctx).await.is_ok());
            assert!(!cache.contains(COURSE_LIST_CACHE_KEY).await);
        }
    }

    #[tokio::test]
    async fn test_absent_key_is_fine() {
        let cache = Arc::new(MemoryCache::new());
        let invalidator = CacheInvalidator::new(cache, COURSE_LIST_CACHE_KEY);
        assert!(invalidator
            .handle(&DomainEvent::course_updated("c1"), &delivery_context(topics::COURSE))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_cache_failure_is_handled() {
        let cache = Arc::new(MemoryCache::new());
        cache.set_fail_on_delete(true).await;
        let invalidator = CacheInvalidator::new(cache, COURSE_LIST_CACHE_KEY);

        let result = invalidator
            .handle(&DomainEvent::course_created("c1"), &delivery_context(topics::COURSE))
            .await;
        assert!(matches!(result, HandlerResult::Handled(HandlerError::Cache(_))));
    }
}
