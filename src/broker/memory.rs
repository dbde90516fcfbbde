//! In-process broker with consumer-group semantics.
//!
//! Backs tests and `orderflow run --in-memory`. All state lives behind one
//! mutex, so claiming never-delivered entries is atomic: two consumers of
//! the same group can never both receive an entry as new.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::StreamBroker;
use crate::error::{Error, Result};
use crate::model::{Entry, EntryId, Fields, PendingSummary, StartPosition};

#[derive(Default)]
struct StreamState {
    entries: BTreeMap<EntryId, Fields>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

struct GroupState {
    /// Highest ID handed out as new to any consumer of the group.
    last_delivered: EntryId,
    /// Delivered but unacknowledged entries and the consumer holding each.
    pending: BTreeMap<EntryId, String>,
}

/// Counts of calls made against an [`InMemoryBroker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub appends: u64,
    pub group_creates: u64,
    pub reads: u64,
    pub acks: u64,
}

#[derive(Default)]
struct Counters {
    appends: AtomicU64,
    group_creates: AtomicU64,
    reads: AtomicU64,
    acks: AtomicU64,
}

/// A broker that keeps every stream in memory.
#[derive(Default)]
pub struct InMemoryBroker {
    streams: Mutex<HashMap<String, StreamState>>,
    appended: Notify,
    counters: Counters,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            appends: self.counters.appends.load(Ordering::Relaxed),
            group_creates: self.counters.group_creates.load(Ordering::Relaxed),
            reads: self.counters.reads.load(Ordering::Relaxed),
            acks: self.counters.acks.load(Ordering::Relaxed),
        }
    }

    /// Every entry currently in `stream`, in ID order.
    pub fn entries(&self, stream: &str) -> Vec<Entry> {
        self.lock()
            .get(stream)
            .map(|s| {
                s.entries
                    .iter()
                    .map(|(id, fields)| Entry {
                        id: *id,
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// IDs pending in `group`, with the consumer each one is claimed by.
    pub fn pending_entries(&self, stream: &str, group: &str) -> Vec<(EntryId, String)> {
        self.lock()
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.iter().map(|(id, c)| (*id, c.clone())).collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StreamState>> {
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hand out up to `count` entries past the group's cursor.
    fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<Entry>> {
        let mut streams = self.lock();
        let StreamState { entries, groups, .. } = streams
            .get_mut(stream)
            .ok_or_else(|| unknown_group(stream, group))?;
        let group_state = groups
            .get_mut(group)
            .ok_or_else(|| unknown_group(stream, group))?;

        let claimed: Vec<Entry> = entries
            .range((Bound::Excluded(group_state.last_delivered), Bound::Unbounded))
            .take(count.max(1))
            .map(|(id, fields)| Entry {
                id: *id,
                fields: fields.clone(),
            })
            .collect();

        for entry in &claimed {
            group_state.pending.insert(entry.id, consumer.to_string());
        }
        if let Some(last) = claimed.last() {
            group_state.last_delivered = last.id;
        }
        Ok(claimed)
    }
}

fn unknown_group(stream: &str, group: &str) -> Error {
    Error::UnknownGroup {
        stream: stream.to_string(),
        group: group.to_string(),
    }
}

fn next_id(last: EntryId) -> EntryId {
    let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
    if now > last.ms {
        EntryId::new(now, 0)
    } else {
        EntryId::new(last.ms, last.seq + 1)
    }
}

#[async_trait]
impl StreamBroker for InMemoryBroker {
    async fn append(&self, stream: &str, fields: &Fields) -> Result<EntryId> {
        self.counters.appends.fetch_add(1, Ordering::Relaxed);
        let id = {
            let mut streams = self.lock();
            let state = streams.entry(stream.to_string()).or_default();
            let id = next_id(state.last_id);
            state.last_id = id;
            state.entries.insert(id, fields.clone());
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
        mkstream: bool,
    ) -> Result<()> {
        self.counters.group_creates.fetch_add(1, Ordering::Relaxed);
        let mut streams = self.lock();
        if !streams.contains_key(stream) {
            if !mkstream {
                return Err(Error::Other(format!(
                    "stream {stream} does not exist; create it or pass mkstream"
                )));
            }
            streams.insert(stream.to_string(), StreamState::default());
        }
        let Some(state) = streams.get_mut(stream) else {
            return Err(unknown_group(stream, group));
        };
        if state.groups.contains_key(group) {
            return Err(Error::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }
        let last_delivered = match start {
            StartPosition::NewOnly => state.last_id,
            StartPosition::Beginning => EntryId::ZERO,
        };
        state.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn group_exists(&self, stream: &str, group: &str) -> Result<bool> {
        Ok(self
            .lock()
            .get(stream)
            .is_some_and(|s| s.groups.contains_key(group)))
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Entry>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + block;

        loop {
            // Register for wakeups before looking, so an append that lands
            // between the claim and the wait is not missed.
            let appended = self.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let claimed = self.claim(stream, group, consumer, count)?;
            if !claimed.is_empty() || block.is_zero() {
                return Ok(claimed);
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64> {
        self.counters.acks.fetch_add(1, Ordering::Relaxed);
        let mut streams = self.lock();
        let Some(group_state) = streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        else {
            return Ok(0);
        };
        let resolved = ids
            .iter()
            .filter(|id| group_state.pending.remove(*id).is_some())
            .count();
        Ok(resolved as u64)
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<PendingSummary> {
        let streams = self.lock();
        let group_state = streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .ok_or_else(|| unknown_group(stream, group))?;

        let mut summary = PendingSummary {
            count: group_state.pending.len() as u64,
            lowest: group_state.pending.keys().next().copied(),
            highest: group_state.pending.keys().next_back().copied(),
            ..PendingSummary::default()
        };
        for consumer in group_state.pending.values() {
            *summary.consumers.entry(consumer.clone()).or_default() += 1;
        }
        Ok(summary)
    }

    async fn len(&self, stream: &str) -> Result<u64> {
        Ok(self
            .lock()
            .get(stream)
            .map_or(0, |s| s.entries.len() as u64))
    }
}
