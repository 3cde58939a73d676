use super::*;
use serde_json::json;

#[test]
fn test_payment_done_wire_shape() {
    let event = DomainEvent::payment_done("c1", "u1");
    let value: serde_json::Value = serde_json::from_slice(&event.to_payload().unwrap()).unwrap();

    assert_eq!(
        value,
        json!({"eventtype": "payment_done", "course_id": "c1", "user_id": "u1"})
    );
}

#[test]
fn test_partition_keys_follow_primary_subject() {
    assert_eq!(DomainEvent::course_deleted("c9").partition_key(), "c9");
    assert_eq!(DomainEvent::payment_done("c1", "u1").partition_key(), "c1");
    assert_eq!(DomainEvent::module_created("m1", "c1").partition_key(), "m1");

    let video = DomainEvent::VideoDeleted(VideoDeleted {
        video_id: "v1".to_string(),
        blob_name: "video/v1.mp4".to_string(),
    });
    assert_eq!(video.partition_key(), "v1");
}

#[test]
fn test_validate_accepts_kind_on_its_topic() {
    assert!(validate(topics::COURSE, &DomainEvent::course_updated("c1")).is_ok());
    assert!(validate(topics::PAYMENT_DONE, &DomainEvent::payment_done("c1", "u1")).is_ok());
}

#[test]
fn test_validate_rejects_kind_on_wrong_topic() {
    let err = validate(topics::COURSE, &DomainEvent::payment_done("c1", "u1")).unwrap_err();
    assert!(matches!(err, SchemaError::UnknownKind { .. }));
}

#[test]
fn test_validate_rejects_empty_subject() {
    let err = validate(topics::PAYMENT_DONE, &DomainEvent::payment_done("c1", "")).unwrap_err();
    assert_eq!(err, SchemaError::MissingField("user_id".to_string()));
}

#[test]
fn test_validate_raw_requires_eventtype() {
    let err = validate_raw(topics::COURSE, &json!({"course_id": "c1"})).unwrap_err();
    assert_eq!(err, SchemaError::MissingField("eventtype".to_string()));
}

#[test]
fn test_validate_raw_unknown_kind() {
    let err = validate_raw(
        topics::COURSE,
        &json!({"eventtype": "course_archived", "course_id": "c1"}),
    )
    .unwrap_err();
    assert!(matches!(err, SchemaError::UnknownKind { kind, .. } if kind == "course_archived"));
}

#[test]
fn test_validate_raw_missing_field() {
    let err = validate_raw(
        topics::MODULE_CREATED,
        &json!({"eventtype": "module_created", "module_id": "m1"}),
    )
    .unwrap_err();
    assert_eq!(err, SchemaError::MissingField("course_id".to_string()));
}

#[test]
fn test_decode_ignores_extra_fields() {
    let payload = br#"{"eventtype":"course_created","course_id":"c1","title":"Rust"}"#;
    let event = decode(topics::COURSE, payload).unwrap();
    assert_eq!(event, DomainEvent::course_created("c1"));
}

#[test]
fn test_decode_accepts_numeric_ids() {
    let payload = br#"{"eventtype":"payment_done","course_id":42,"user_id":"u1"}"#;
    let event = decode(topics::PAYMENT_DONE, payload).unwrap();
    assert_eq!(event.partition_key(), "42");
}

#[test]
fn test_decode_rejects_garbage() {
    let err = decode(topics::COURSE, b"not json").unwrap_err();
    assert!(matches!(err, SchemaError::Malformed(_)));
}

#[test]
fn test_event_kind_roundtrips_through_name() {
    for kind in EventKind::ALL {
        assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
    }
}

#[test]
fn test_every_kind_belongs_to_exactly_one_topic() {
    for kind in EventKind::ALL {
        let owners = topics::ALL
            .iter()
            .filter(|t| kinds_for_topic(t).contains(&kind))
            .count();
        assert_eq!(owners, 1, "{kind} should be owned by one topic");
    }
}
