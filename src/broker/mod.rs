//! Stream broker client interface.
//!
//! The broker owns the durable log, the group cursors and the pending
//! entries lists. Everything in this crate talks to it through
//! [`StreamBroker`], shared across tasks as `Arc<dyn StreamBroker>`.

pub mod memory;
pub mod redis_streams;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Entry, EntryId, Fields, PendingSummary, StartPosition};

pub use self::memory::{BrokerStats, InMemoryBroker};
pub use self::redis_streams::RedisBroker;

/// Operations a consumer-group stream broker must provide.
///
/// Implementations must be safe to call concurrently from many tasks.
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Append an entry and return the ID the broker assigned to it.
    async fn append(&self, stream: &str, fields: &Fields) -> Result<EntryId>;

    /// Create `group` on `stream`, starting at `start`.
    ///
    /// Fails with [`Error::GroupExists`](crate::error::Error::GroupExists)
    /// if the group is already there. With `mkstream` a missing stream is
    /// created empty.
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
        mkstream: bool,
    ) -> Result<()>;

    /// Whether `group` exists on `stream`. A missing stream is `false`.
    async fn group_exists(&self, stream: &str, group: &str) -> Result<bool>;

    /// Claim up to `count` never-delivered entries for `consumer`.
    ///
    /// Returned entries become pending for `consumer`. Waits up to `block`
    /// when nothing is available; an empty vector means the wait timed out.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Entry>>;

    /// Acknowledge entries, resolving them for `group`.
    ///
    /// Returns how many entries were actually pending; acknowledging an
    /// entry twice resolves it once.
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64>;

    /// Summary of the group's pending entries list.
    async fn pending(&self, stream: &str, group: &str) -> Result<PendingSummary>;

    /// Number of entries in the stream. A missing stream has length 0.
    async fn len(&self, stream: &str) -> Result<u64>;
}
