//! Redis Streams broker against a live server.
//!
//! Run with a local Redis (`docker run -d -p 6379:6379 redis:7`):
//! ```sh
//! cargo test --test redis_test -- --ignored
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use orderflow::broker::{RedisBroker, StreamBroker};
use orderflow::consumer::{Consumer, ConsumerConfig};
use orderflow::error::Error;
use orderflow::group::{GroupInit, ensure_group};
use orderflow::model::{OrderEvent, StartPosition};

async fn test_broker() -> RedisBroker {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    RedisBroker::connect(&url).await.unwrap()
}

/// A stream name no earlier run has used.
fn fresh_stream() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("orders-test-{nanos}")
}

fn order(order_id: u32) -> OrderEvent {
    OrderEvent {
        order_id,
        ..OrderEvent::random()
    }
}

#[tokio::test]
#[ignore] // Requires running Redis
async fn group_initialization_is_idempotent() {
    let broker = test_broker().await;
    let stream = fresh_stream();

    assert!(!broker.group_exists(&stream, "g").await.unwrap());
    assert_eq!(ensure_group(&broker, &stream, "g").await.unwrap(), GroupInit::Created);
    assert_eq!(ensure_group(&broker, &stream, "g").await.unwrap(), GroupInit::Existing);

    let err = broker
        .create_group(&stream, "g", StartPosition::NewOnly, true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GroupExists { .. }), "got {err:?}");
}

#[tokio::test]
#[ignore] // Requires running Redis
async fn append_read_ack_round_trip() {
    let broker = test_broker().await;
    let stream = fresh_stream();
    ensure_group(&broker, &stream, "g").await.unwrap();

    let first = broker.append(&stream, &order(7).to_fields()).await.unwrap();
    let second = broker.append(&stream, &order(4).to_fields()).await.unwrap();
    assert!(second > first);
    assert_eq!(broker.len(&stream).await.unwrap(), 2);

    let read = broker
        .read_group(&stream, "g", "consumer-1", 10, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(read.len(), 2);
    assert_eq!(OrderEvent::from_fields(&read[0].fields).unwrap().order_id, 7);

    let pending = broker.pending(&stream, "g").await.unwrap();
    assert_eq!(pending.count, 2);
    assert_eq!(pending.lowest, Some(first));
    assert_eq!(pending.consumers.get("consumer-1"), Some(&2));

    assert_eq!(broker.ack(&stream, "g", &[first]).await.unwrap(), 1);
    assert_eq!(broker.ack(&stream, "g", &[first]).await.unwrap(), 0);
    assert_eq!(broker.pending(&stream, "g").await.unwrap().count, 1);
}

#[tokio::test]
#[ignore] // Requires running Redis
async fn blocking_read_times_out_empty() {
    let broker = test_broker().await;
    let stream = fresh_stream();
    ensure_group(&broker, &stream, "g").await.unwrap();

    let read = broker
        .read_group(&stream, "g", "consumer-1", 1, Duration::from_millis(200))
        .await
        .unwrap();
    assert!(read.is_empty());
}

#[tokio::test]
#[ignore] // Requires running Redis
async fn consumer_acks_odd_and_leaves_even_pending() {
    let broker = Arc::new(test_broker().await);
    let stream = fresh_stream();
    ensure_group(broker.as_ref(), &stream, "g").await.unwrap();
    broker.append(&stream, &order(4).to_fields()).await.unwrap();
    broker.append(&stream, &order(7).to_fields()).await.unwrap();

    let consumer = Consumer::new(
        1,
        broker.clone(),
        stream.clone(),
        "g",
        ConsumerConfig {
            max_processing: Duration::ZERO,
            ..ConsumerConfig::default()
        },
    );
    let first = consumer.poll_once().await.unwrap();
    let second = consumer.poll_once().await.unwrap();

    assert_eq!(first.failed, 1);
    assert_eq!(second.acknowledged, 1);
    assert_eq!(broker.pending(&stream, "g").await.unwrap().count, 1);
}
