//! Domain events exchanged between services.
//!
//! Every event travels as a flat JSON object whose `eventtype` field names the
//! variant, alongside the kind-specific fields:
//!
//! ```text
//! { "eventtype": "payment_done", "course_id": "...", "user_id": "..." }
//! ```
//!
//! The partition key of an event is the id of its primary subject, so events
//! about one entity are delivered in publish order while events about
//! different entities carry no relative ordering.

pub mod catalog;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use catalog::{decode, kinds_for_topic, validate, validate_raw, SchemaError};

/// Well-known topic names.
pub mod topics {
    /// Course lifecycle (`course_created`, `course_updated`, `course_deleted`).
    pub const COURSE: &str = "course";
    /// Completed payments (`payment_done`).
    pub const PAYMENT_DONE: &str = "payment-done";
    /// New course modules (`module_created`).
    pub const MODULE_CREATED: &str = "module-created";
    /// Uploaded and removed course material (`video_*`, `note_*`).
    pub const CONTENT: &str = "material-data";

    /// All topics known to the catalog.
    pub const ALL: &[&str] = &[COURSE, PAYMENT_DONE, MODULE_CREATED, CONTENT];
}

/// Name of the discriminator field in the wire envelope.
pub const KIND_FIELD: &str = "eventtype";

/// Discriminator for [`DomainEvent`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CourseCreated,
    CourseUpdated,
    CourseDeleted,
    PaymentDone,
    ModuleCreated,
    VideoCreated,
    VideoDeleted,
    NoteCreated,
    NoteDeleted,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::CourseCreated,
        EventKind::CourseUpdated,
        EventKind::CourseDeleted,
        EventKind::PaymentDone,
        EventKind::ModuleCreated,
        EventKind::VideoCreated,
        EventKind::VideoDeleted,
        EventKind::NoteCreated,
        EventKind::NoteDeleted,
    ];

    /// Wire name used in the `eventtype` field.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::CourseCreated => "course_created",
            EventKind::CourseUpdated => "course_updated",
            EventKind::CourseDeleted => "course_deleted",
            EventKind::PaymentDone => "payment_done",
            EventKind::ModuleCreated => "module_created",
            EventKind::VideoCreated => "video_created",
            EventKind::VideoDeleted => "video_deleted",
            EventKind::NoteCreated => "note_created",
            EventKind::NoteDeleted => "note_deleted",
        }
    }

    /// Fields that must be present and non-empty for this kind.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            EventKind::CourseCreated | EventKind::CourseUpdated | EventKind::CourseDeleted => {
                &["course_id"]
            }
            EventKind::PaymentDone => &["course_id", "user_id"],
            EventKind::ModuleCreated => &["module_id", "course_id"],
            EventKind::VideoCreated => &["course_id", "module_id", "video_id", "blob_name"],
            EventKind::NoteCreated => &["course_id", "module_id", "note_id", "blob_name"],
            EventKind::VideoDeleted => &["video_id", "blob_name"],
            EventKind::NoteDeleted => &["note_id", "blob_name"],
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SchemaError::UnknownKind {
                topic: None,
                kind: s.to_string(),
            })
    }
}

/// Subject of a course lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseChanged {
    pub course_id: String,
}

/// A learner completed payment for a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDone {
    pub course_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
}

/// A module was added to a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleCreated {
    pub module_id: String,
    pub course_id: String,
}

/// A lecture video was uploaded to a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCreated {
    pub course_id: String,
    pub module_id: String,
    pub video_id: String,
    pub blob_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
}

/// A notes document was uploaded to a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteCreated {
    pub course_id: String,
    pub module_id: String,
    pub note_id: String,
    pub blob_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
}

/// A lecture video was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDeleted {
    pub video_id: String,
    pub blob_name: String,
}

/// A notes document was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteDeleted {
    pub note_id: String,
    pub blob_name: String,
}

/// A recognized domain event, one variant per [`EventKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventtype", rename_all = "snake_case")]
pub enum DomainEvent {
    CourseCreated(CourseChanged),
    CourseUpdated(CourseChanged),
    CourseDeleted(CourseChanged),
    PaymentDone(PaymentDone),
    ModuleCreated(ModuleCreated),
    VideoCreated(VideoCreated),
    VideoDeleted(VideoDeleted),
    NoteCreated(NoteCreated),
    NoteDeleted(NoteDeleted),
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::CourseCreated(_) => EventKind::CourseCreated,
            DomainEvent::CourseUpdated(_) => EventKind::CourseUpdated,
            DomainEvent::CourseDeleted(_) => EventKind::CourseDeleted,
            DomainEvent::PaymentDone(_) => EventKind::PaymentDone,
            DomainEvent::ModuleCreated(_) => EventKind::ModuleCreated,
            DomainEvent::VideoCreated(_) => EventKind::VideoCreated,
            DomainEvent::VideoDeleted(_) => EventKind::VideoDeleted,
            DomainEvent::NoteCreated(_) => EventKind::NoteCreated,
            DomainEvent::NoteDeleted(_) => EventKind::NoteDeleted,
        }
    }

    /// Routing key for the transport.
    ///
    /// Payments are keyed by course so that enrollment writes against one
    /// course are applied in order.
    pub fn partition_key(&self) -> &str {
        match self {
            DomainEvent::CourseCreated(e)
            | DomainEvent::CourseUpdated(e)
            | DomainEvent::CourseDeleted(e) => &e.course_id,
            DomainEvent::PaymentDone(e) => &e.course_id,
            DomainEvent::ModuleCreated(e) => &e.module_id,
            DomainEvent::VideoCreated(e) => &e.video_id,
            DomainEvent::VideoDeleted(e) => &e.video_id,
            DomainEvent::NoteCreated(e) => &e.note_id,
            DomainEvent::NoteDeleted(e) => &e.note_id,
        }
    }

    /// Required subject fields paired with their values, in catalog order.
    pub fn subject_fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            DomainEvent::CourseCreated(e)
            | DomainEvent::CourseUpdated(e)
            | DomainEvent::CourseDeleted(e) => vec![("course_id", e.course_id.as_str())],
            DomainEvent::PaymentDone(e) => vec![
                ("course_id", e.course_id.as_str()),
                ("user_id", e.user_id.as_str()),
            ],
            DomainEvent::ModuleCreated(e) => vec![
                ("module_id", e.module_id.as_str()),
                ("course_id", e.course_id.as_str()),
            ],
            DomainEvent::VideoCreated(e) => vec![
                ("course_id", e.course_id.as_str()),
                ("module_id", e.module_id.as_str()),
                ("video_id", e.video_id.as_str()),
                ("blob_name", e.blob_name.as_str()),
            ],
            DomainEvent::NoteCreated(e) => vec![
                ("course_id", e.course_id.as_str()),
                ("module_id", e.module_id.as_str()),
                ("note_id", e.note_id.as_str()),
                ("blob_name", e.blob_name.as_str()),
            ],
            DomainEvent::VideoDeleted(e) => vec![
                ("video_id", e.video_id.as_str()),
                ("blob_name", e.blob_name.as_str()),
            ],
            DomainEvent::NoteDeleted(e) => vec![
                ("note_id", e.note_id.as_str()),
                ("blob_name", e.blob_name.as_str()),
            ],
        }
    }

    /// Encode to the JSON wire envelope.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn course_created(course_id: impl Into<String>) -> Self {
        DomainEvent::CourseCreated(CourseChanged {
            course_id: course_id.into(),
        })
    }

    pub fn course_updated(course_id: impl Into<String>) -> Self {
        DomainEvent::CourseUpdated(CourseChanged {
            course_id: course_id.into(),
        })
    }

    pub fn course_deleted(course_id: impl Into<String>) -> Self {
        DomainEvent::CourseDeleted(CourseChanged {
            course_id: course_id.into(),
        })
    }

    pub fn payment_done(course_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        DomainEvent::PaymentDone(PaymentDone {
            course_id: course_id.into(),
            user_id: user_id.into(),
            payment_id: None,
        })
    }

    pub fn module_created(module_id: impl Into<String>, course_id: impl Into<String>) -> Self {
        DomainEvent::ModuleCreated(ModuleCreated {
            module_id: module_id.into(),
            course_id: course_id.into(),
        })
    }
}

#[cfg(test)]
mod tests;
