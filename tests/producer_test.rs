//! Producer appends and pacing.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{FlakyBroker, STREAM};
use orderflow::broker::{InMemoryBroker, StreamBroker};
use orderflow::model::OrderEvent;
use orderflow::producer::{Producer, ProducerConfig};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn produce_once_appends_a_decodable_order() {
    let broker = Arc::new(InMemoryBroker::new());
    let producer = Producer::new(1, broker.clone(), STREAM, ProducerConfig::default());

    let (id, order) = producer.produce_once().await.unwrap();

    let entries = broker.entries(STREAM);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, id);
    let decoded = OrderEvent::from_fields(&entries[0].fields).unwrap();
    assert_eq!(decoded.order_id, order.order_id);
    assert_eq!(decoded.customer, order.customer);
    assert!(decoded.customer.starts_with("customer_"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_producers_append_one_hundred_unique_entries() {
    let broker = Arc::new(InMemoryBroker::new());

    let mut handles = Vec::new();
    for id in 1..=2 {
        let producer = Producer::new(id, broker.clone(), STREAM, ProducerConfig::default());
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..50 {
                ids.push(producer.produce_once().await.unwrap().0);
            }
            ids
        }));
    }

    let mut all = HashSet::new();
    for handle in handles {
        let ids = handle.await.unwrap();
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids not increasing");
        all.extend(ids);
    }

    assert_eq!(broker.len(STREAM).await.unwrap(), 100);
    assert_eq!(all.len(), 100);
    let stored: Vec<_> = broker.entries(STREAM).into_iter().map(|e| e.id).collect();
    assert!(stored.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test(start_paused = true)]
async fn run_paces_appends_until_cancelled() {
    let broker = Arc::new(InMemoryBroker::new());
    let producer = Producer::new(1, broker.clone(), STREAM, ProducerConfig::default());
    let cancel = CancellationToken::new();

    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { producer.run(cancel).await })
    };
    tokio::time::sleep(Duration::from_secs(15)).await;
    cancel.cancel();
    task.await.unwrap();

    // Pauses are under 1.5s, so 15s fits at least ten appends.
    let appended = broker.len(STREAM).await.unwrap();
    assert!(appended >= 10, "only {appended} appends");
}

#[tokio::test(start_paused = true)]
async fn append_failures_do_not_stop_the_producer() {
    let broker = Arc::new(FlakyBroker::default());
    broker.fail_append.store(true, Ordering::SeqCst);
    let producer = Producer::new(1, broker.clone(), STREAM, ProducerConfig::default());
    let cancel = CancellationToken::new();

    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { producer.run(cancel).await })
    };
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(broker.len(STREAM).await.unwrap(), 0);

    broker.fail_append.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(10)).await;
    cancel.cancel();
    task.await.unwrap();

    assert!(broker.len(STREAM).await.unwrap() > 0);
}
