//! Topic catalog and envelope validation.
//!
//! Producers validate typed events before publish; consumers validate raw
//! envelopes before dispatch, since other services publish to the same topics.

use serde_json::Value;

use super::{topics, DomainEvent, EventKind, KIND_FIELD};

/// Schema validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Unknown event kind '{kind}' on topic '{}'", .topic.as_deref().unwrap_or("*"))]
    UnknownKind { topic: Option<String>, kind: String },

    #[error("Missing or empty field: {0}")]
    MissingField(String),

    #[error("Malformed envelope: {0}")]
    Malformed(String),
}

/// Kinds permitted on a topic. Unknown topics permit nothing.
pub fn kinds_for_topic(topic: &str) -> &'static [EventKind] {
    match topic {
        topics::COURSE => &[
            EventKind::CourseCreated,
            EventKind::CourseUpdated,
            EventKind::CourseDeleted,
        ],
        topics::PAYMENT_DONE => &[EventKind::PaymentDone],
        topics::MODULE_CREATED => &[EventKind::ModuleCreated],
        topics::CONTENT => &[
            EventKind::VideoCreated,
            EventKind::VideoDeleted,
            EventKind::NoteCreated,
            EventKind::NoteDeleted,
        ],
        _ => &[],
    }
}

fn unknown(topic: &str, kind: impl Into<String>) -> SchemaError {
    SchemaError::UnknownKind {
        topic: Some(topic.to_string()),
        kind: kind.into(),
    }
}

/// Validate a typed event against the catalog entry for `topic`.
pub fn validate(topic: &str, event: &DomainEvent) -> Result<(), SchemaError> {
    let kind = event.kind();
    if !kinds_for_topic(topic).contains(&kind) {
        return Err(unknown(topic, kind.as_str()));
    }

    for (field, value) in event.subject_fields() {
        if value.trim().is_empty() {
            return Err(SchemaError::MissingField(field.to_string()));
        }
    }

    Ok(())
}

/// Validate a raw JSON envelope, returning its kind.
pub fn validate_raw(topic: &str, envelope: &Value) -> Result<EventKind, SchemaError> {
    let object = envelope
        .as_object()
        .ok_or_else(|| SchemaError::Malformed("envelope is not a JSON object".to_string()))?;

    let kind_name = match object.get(KIND_FIELD) {
        Some(Value::String(s)) if !s.is_empty() => s.as_str(),
        _ => return Err(SchemaError::MissingField(KIND_FIELD.to_string())),
    };

    let kind = kinds_for_topic(topic)
        .iter()
        .copied()
        .find(|k| k.as_str() == kind_name)
        .ok_or_else(|| unknown(topic, kind_name))?;

    for field in kind.required_fields() {
        let present = match object.get(*field) {
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Number(_)) => true,
            _ => false,
        };
        if !present {
            return Err(SchemaError::MissingField((*field).to_string()));
        }
    }

    Ok(kind)
}

/// Decode and validate a payload received on `topic`.
pub fn decode(topic: &str, payload: &[u8]) -> Result<DomainEvent, SchemaError> {
    let envelope: Value =
        serde_json::from_slice(payload).map_err(|e| SchemaError::Malformed(e.to_string()))?;
    validate_raw(topic, &envelope)?;
    let envelope = normalize_ids(envelope);
    serde_json::from_value(envelope).map_err(|e| SchemaError::Malformed(e.to_string()))
}

/// Numeric ids from loosely-typed publishers are carried as strings.
fn normalize_ids(mut envelope: Value) -> Value {
    if let Some(object) = envelope.as_object_mut() {
        for value in object.values_mut() {
            if let Value::Number(n) = value {
                *value = Value::String(n.to_string());
            }
        }
    }
    envelope
}
