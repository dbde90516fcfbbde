//! Shared test helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use orderflow::broker::{InMemoryBroker, StreamBroker};
use orderflow::error::{Error, Result};
use orderflow::model::{Entry, EntryId, Fields, PendingSummary, StartPosition};

pub const STREAM: &str = "orders";
pub const GROUP: &str = "order-consumer-group";

/// Fields for an order with the given ID.
pub fn order_fields(order_id: &str) -> Fields {
    Fields::from([
        ("order_id".to_string(), order_id.to_string()),
        ("customer".to_string(), "customer_1".to_string()),
        ("timestamp".to_string(), "2024-05-01T12:30:00Z".to_string()),
    ])
}

/// In-memory broker with the stream and group already set up.
pub async fn broker_with_group() -> Arc<InMemoryBroker> {
    let broker = Arc::new(InMemoryBroker::new());
    broker
        .create_group(STREAM, GROUP, StartPosition::NewOnly, true)
        .await
        .unwrap();
    broker
}

fn unavailable() -> Error {
    Error::Other("broker unavailable".to_string())
}

/// Delegates to an [`InMemoryBroker`] but can be told to fail operations.
#[derive(Default)]
pub struct FlakyBroker {
    pub inner: InMemoryBroker,
    pub fail_append: AtomicBool,
    pub fail_create: AtomicBool,
    pub fail_read: AtomicBool,
    pub fail_ack: AtomicBool,
    pub read_attempts: AtomicU64,
}

impl FlakyBroker {
    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl StreamBroker for FlakyBroker {
    async fn append(&self, stream: &str, fields: &Fields) -> Result<EntryId> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.append(stream, fields).await
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
        mkstream: bool,
    ) -> Result<()> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.create_group(stream, group, start, mkstream).await
    }

    async fn group_exists(&self, stream: &str, group: &str) -> Result<bool> {
        self.inner.group_exists(stream, group).await
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Entry>> {
        self.read_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_read.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner
            .read_group(stream, group, consumer, count, block)
            .await
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64> {
        if self.fail_ack.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.ack(stream, group, ids).await
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<PendingSummary> {
        self.inner.pending(stream, group).await
    }

    async fn len(&self, stream: &str) -> Result<u64> {
        self.inner.len(stream).await
    }
}
