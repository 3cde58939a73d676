//! Course, module and user documents.
//!
//! The consumers need a narrow slice of the document database: lookups by id,
//! a conditional enrollment write, and set-style edits of a user's course
//! list. Both writes are idempotent so redelivered events converge.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongodb;

pub use memory::MemoryDocumentStore;
#[cfg(feature = "mongodb")]
pub use self::mongodb::MongoDocumentStore;

/// Result type for document operations.
pub type Result<T> = std::result::Result<T, DocumentError>;

/// Errors from the document store.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Document store connection failed: {0}")]
    Connection(String),

    #[error("Document query failed: {0}")]
    Query(String),

    #[error("Malformed document {id}: {message}")]
    Malformed { id: String, message: String },

    #[error("Document store not configured: {0}")]
    NotConfigured(String),

    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    Mongo(#[from] ::mongodb::error::Error),
}

/// A learner as recorded on a course.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledStudent {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// A course and its enrollment ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseRecord {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub teacher_name: Option<String>,
    pub students: Vec<EnrolledStudent>,
    pub student_count: u64,
    pub total_earned: f64,
}

impl CourseRecord {
    pub fn has_student(&self, user_id: &str) -> bool {
        self.students.iter().any(|s| s.id == user_id)
    }
}

/// A module within a course.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleRecord {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub description: String,
}

/// A platform user.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub courses: Vec<String>,
}

impl UserRecord {
    pub fn as_student(&self) -> EnrolledStudent {
        EnrolledStudent {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

/// Document database operations used by the consumers.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserRecord>>;

    async fn find_course(&self, course_id: &str) -> Result<Option<CourseRecord>>;

    async fn find_module(&self, module_id: &str) -> Result<Option<ModuleRecord>>;

    /// Append `student` to the course and add `price` to its earnings, only if
    /// the student is not already enrolled. Returns whether the write applied.
    async fn enroll_student(
        &self,
        course_id: &str,
        student: &EnrolledStudent,
        price: f64,
    ) -> Result<bool>;

    /// Set-add `course_id` to the user's course list.
    async fn add_course_to_user(&self, user_id: &str, course_id: &str) -> Result<()>;

    /// Remove `course_id` from every user's course list. Returns users changed.
    async fn remove_course_from_users(&self, course_id: &str) -> Result<u64>;
}

/// Document backend discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentsType {
    #[default]
    Memory,
    Mongodb,
}

/// Document store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    #[serde(rename = "type")]
    pub documents_type: DocumentsType,
    /// MongoDB connection URI.
    pub uri: String,
    /// Database name.
    pub database: String,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            documents_type: DocumentsType::Memory,
            uri: "mongodb://localhost:27017".to_string(),
            database: "shiksha".to_string(),
        }
    }
}

/// Initialize the configured document store.
pub async fn init_document_store(config: &DocumentsConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.documents_type {
        DocumentsType::Memory => {
            info!(documents_type = "memory", "Document store initialized");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
        DocumentsType::Mongodb => {
            #[cfg(feature = "mongodb")]
            {
                let store = MongoDocumentStore::connect(&config.uri, &config.database).await?;
                info!(
                    documents_type = "mongodb",
                    database = %config.database,
                    "Document store initialized"
                );
                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "mongodb"))]
            {
                Err(DocumentError::NotConfigured(
                    "MongoDB support requires the 'mongodb' feature. Rebuild with --features mongodb"
                        .to_string(),
                ))
            }
        }
    }
}
