//! In-memory document store for standalone mode and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    CourseRecord, DocumentError, DocumentStore, EnrolledStudent, ModuleRecord, Result,
    UserRecord,
};

/// Document store backed by hash maps.
#[derive(Default)]
pub struct MemoryDocumentStore {
    users: RwLock<HashMap<String, UserRecord>>,
    courses: RwLock<HashMap<String, CourseRecord>>,
    modules: RwLock<HashMap<String, ModuleRecord>>,
    fail_reads: RwLock<bool>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: UserRecord) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    pub async fn insert_course(&self, course: CourseRecord) {
        self.courses.write().await.insert(course.id.clone(), course);
    }

    pub async fn insert_module(&self, module: ModuleRecord) {
        self.modules.write().await.insert(module.id.clone(), module);
    }

    /// Make every lookup fail, to exercise error isolation.
    pub async fn set_fail_reads(&self, fail: bool) {
        *self.fail_reads.write().await = fail;
    }

    async fn check_reads(&self) -> Result<()> {
        if *self.fail_reads.read().await {
            return Err(DocumentError::Connection("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        self.check_reads().await?;
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn find_course(&self, course_id: &str) -> Result<Option<CourseRecord>> {
        self.check_reads().await?;
        Ok(self.courses.read().await.get(course_id).cloned())
    }

    async fn find_module(&self, module_id: &str) -> Result<Option<ModuleRecord>> {
        self.check_reads().await?;
        Ok(self.modules.read().await.get(module_id).cloned())
    }

    async fn enroll_student(
        &self,
        course_id: &str,
        student: &EnrolledStudent,
        price: f64,
    ) -> Result<bool> {
        let mut courses = self.courses.write().await;
        let Some(course) = courses.get_mut(course_id) else {
            return Ok(false);
        };
        if course.has_student(&student.id) {
            return Ok(false);
        }
        course.students.push(student.clone());
        course.student_count += 1;
        course.total_earned += price;
        Ok(true)
    }

    async fn add_course_to_user(&self, user_id: &str, course_id: &str) -> Result<()> {
        if let Some(user) = self.users.write().await.get_mut(user_id) {
            if !user.courses.iter().any(|c| c == course_id) {
                user.courses.push(course_id.to_string());
            }
        }
        Ok(())
    }

    async fn remove_course_from_users(&self, course_id: &str) -> Result<u64> {
        let mut changed = 0;
        for user in self.users.write().await.values_mut() {
            let before = user.courses.len();
            user.courses.retain(|c| c != course_id);
            if user.courses.len() != before {
                changed += 1;
            }
        }
        Ok(changed)
    }
}
