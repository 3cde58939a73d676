use super::*;
use std::time::Duration;

fn record(key: &str, payload: &str) -> OutboundRecord {
    OutboundRecord {
        key: key.to_string(),
        payload: payload.as_bytes().to_vec(),
    }
}

async fn next(consumer: &mut Box<dyn Consumer>) -> Delivery {
    tokio::time::timeout(Duration::from_secs(1), consumer.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("stream ended")
        .expect("transport fault")
}

#[test]
fn test_partition_for_is_stable() {
    let first = partition_for("course-1", 3);
    for _ in 0..10 {
        assert_eq!(partition_for("course-1", 3), first);
    }
    assert!((0..3).contains(&first));
}

#[test]
fn test_partition_for_single_partition() {
    assert_eq!(partition_for("anything", 1), 0);
    assert_eq!(partition_for("anything", 0), 0);
}

#[tokio::test]
async fn test_send_without_consumers_succeeds() {
    let transport = ChannelTransport::new(3);
    let producer = transport.producer("course").await.unwrap();

    let result = producer.send_batch(vec![record("c1", "{}")]).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_consumer_receives_keyed_records() {
    let transport = ChannelTransport::new(3);
    let mut consumer = transport.consumer("course", "group-a").await.unwrap();
    let producer = transport.producer("course").await.unwrap();

    producer.send_batch(vec![record("c1", "one")]).await.unwrap();

    let delivery = next(&mut consumer).await;
    assert_eq!(delivery.topic, "course");
    assert_eq!(delivery.key.as_deref(), Some("c1"));
    assert_eq!(delivery.payload, b"one");
    assert_eq!(delivery.partition, partition_for("c1", 3));
}

#[tokio::test]
async fn test_same_key_preserves_order_and_offsets() {
    let transport = ChannelTransport::new(4);
    let mut consumer = transport.consumer("payment-done", "g").await.unwrap();
    let producer = transport.producer("payment-done").await.unwrap();

    let batch = (0..5).map(|i| record("same", &i.to_string())).collect();
    producer.send_batch(batch).await.unwrap();

    for expected in 0..5i64 {
        let delivery = next(&mut consumer).await;
        assert_eq!(delivery.payload, expected.to_string().as_bytes());
        assert_eq!(delivery.offset, expected);
    }
}

#[tokio::test]
async fn test_topics_are_isolated() {
    let transport = ChannelTransport::new(2);
    let mut course = transport.consumer("course", "g").await.unwrap();
    let payments = transport.producer("payment-done").await.unwrap();
    let courses = transport.producer("course").await.unwrap();

    payments.send_batch(vec![record("c1", "pay")]).await.unwrap();
    courses.send_batch(vec![record("c1", "course")]).await.unwrap();

    let delivery = next(&mut course).await;
    assert_eq!(delivery.payload, b"course");
}

#[tokio::test]
async fn test_closed_producer_rejects_sends() {
    let transport = ChannelTransport::new(1);
    let producer = transport.producer("course").await.unwrap();
    producer.close().await.unwrap();
    producer.close().await.unwrap();

    let err = producer.send_batch(vec![record("c1", "x")]).await.unwrap_err();
    assert!(matches!(err, BusError::Closed));
}

#[tokio::test]
async fn test_closed_consumer_ends_stream() {
    let transport = ChannelTransport::new(2);
    let mut consumer = transport.consumer("course", "g").await.unwrap();
    consumer.close().await.unwrap();

    let next = tokio::time::timeout(Duration::from_secs(1), consumer.recv())
        .await
        .unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn test_each_consumer_sees_every_record() {
    let transport = ChannelTransport::new(2);
    let mut first = transport.consumer("course", "g").await.unwrap();
    let mut second = transport.consumer("course", "g").await.unwrap();
    let producer = transport.producer("course").await.unwrap();

    producer.send_batch(vec![record("c1", "x")]).await.unwrap();

    assert_eq!(next(&mut first).await.payload, b"x");
    assert_eq!(next(&mut second).await.payload, b"x");
}
