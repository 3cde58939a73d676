//! Ingestion job descriptor handed to the processing workers.
//!
//! Wire shape (before transport encoding):
//!
//! ```text
//! {
//!   "jobId": "<uuid>",
//!   "blobUrl": "<signed URL>",
//!   "metadata": {
//!     "courseId": "...", "moduleId": "...",
//!     "sourceType": "pdf|docx|txt|video|notes",
//!     "videoId": "...|null", "notesId": "...|null",
//!     "originalName": "..."
//!   }
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Violations of the job contract. Reported to the caller, never queued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unsupported source type '{0}', expected one of pdf, docx, txt, video, notes")]
    UnknownSourceType(String),
}

/// Kind of material a job carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
    Docx,
    Txt,
    Video,
    Notes,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Pdf => "pdf",
            SourceType::Docx => "docx",
            SourceType::Txt => "txt",
            SourceType::Video => "video",
            SourceType::Notes => "notes",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = JobValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(SourceType::Pdf),
            "docx" => Ok(SourceType::Docx),
            "txt" => Ok(SourceType::Txt),
            "video" => Ok(SourceType::Video),
            "notes" => Ok(SourceType::Notes),
            other => Err(JobValidationError::UnknownSourceType(other.to_string())),
        }
    }
}

/// Job metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    pub course_id: String,
    pub module_id: String,
    pub source_type: SourceType,
    pub video_id: Option<String>,
    pub notes_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
}

impl JobMetadata {
    pub fn new(
        course_id: impl Into<String>,
        module_id: impl Into<String>,
        source_type: SourceType,
    ) -> Self {
        Self {
            course_id: course_id.into(),
            module_id: module_id.into(),
            source_type,
            video_id: None,
            notes_id: None,
            original_name: None,
        }
    }

    pub fn with_video_id(mut self, video_id: impl Into<String>) -> Self {
        self.video_id = Some(video_id.into());
        self
    }

    pub fn with_notes_id(mut self, notes_id: impl Into<String>) -> Self {
        self.notes_id = Some(notes_id.into());
        self
    }

    pub fn with_original_name(mut self, original_name: impl Into<String>) -> Self {
        self.original_name = Some(original_name.into());
        self
    }

    /// Check required ids. `videoId` is required for video, `notesId` for notes.
    pub fn validate(&self) -> Result<(), JobValidationError> {
        if self.course_id.trim().is_empty() {
            return Err(JobValidationError::MissingField("courseId"));
        }
        if self.module_id.trim().is_empty() {
            return Err(JobValidationError::MissingField("moduleId"));
        }
        match self.source_type {
            SourceType::Video if is_blank(&self.video_id) => {
                Err(JobValidationError::MissingField("videoId"))
            }
            SourceType::Notes if is_blank(&self.notes_id) => {
                Err(JobValidationError::MissingField("notesId"))
            }
            _ => Ok(()),
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// A validated unit of work for the processing workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionJob {
    pub job_id: Uuid,
    pub blob_url: String,
    pub metadata: JobMetadata,
}

impl IngestionJob {
    /// Build a job with a fresh id after checking the metadata.
    pub fn new(
        blob_url: impl Into<String>,
        metadata: JobMetadata,
    ) -> Result<Self, JobValidationError> {
        Self::with_id(Uuid::new_v4(), blob_url, metadata)
    }

    pub fn with_id(
        job_id: Uuid,
        blob_url: impl Into<String>,
        metadata: JobMetadata,
    ) -> Result<Self, JobValidationError> {
        let job = Self {
            job_id,
            blob_url: blob_url.into(),
            metadata,
        };
        job.validate()?;
        Ok(job)
    }

    /// Check the job contract. Jobs built as literals or decoded from a
    /// message have not been through [`IngestionJob::new`].
    pub fn validate(&self) -> Result<(), JobValidationError> {
        self.metadata.validate()?;
        if self.blob_url.trim().is_empty() {
            return Err(JobValidationError::MissingField("blobUrl"));
        }
        Ok(())
    }
}

/// Caller-supplied fields of an ingestion request, as received at the
/// upload boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub course_id: Option<String>,
    pub module_id: Option<String>,
    pub source_type: Option<String>,
    pub video_id: Option<String>,
    pub notes_id: Option<String>,
    /// Blob category tag; `default` when absent.
    pub category: Option<String>,
}

impl IngestRequest {
    /// Validate into job metadata.
    pub fn into_metadata(
        self,
        original_name: Option<String>,
    ) -> Result<JobMetadata, JobValidationError> {
        let course_id = required(self.course_id, "courseId")?;
        let module_id = required(self.module_id, "moduleId")?;
        let source_type: SourceType = required(self.source_type, "sourceType")?.parse()?;

        let metadata = JobMetadata {
            course_id,
            module_id,
            source_type,
            video_id: self.video_id.filter(|v| !v.is_empty()),
            notes_id: self.notes_id.filter(|v| !v.is_empty()),
            original_name,
        };
        metadata.validate()?;
        Ok(metadata)
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, JobValidationError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(JobValidationError::MissingField(field))
}
