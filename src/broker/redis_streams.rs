//! Redis Streams broker.
//!
//! XADD, XGROUP CREATE, XINFO GROUPS, XREADGROUP, XACK, XPENDING and XLEN
//! over the `redis` crate. Non-blocking commands share one auto-reconnecting
//! `ConnectionManager`. Each consumer gets its own multiplexed connection
//! for XREADGROUP BLOCK, because a blocked command holds its connection on
//! the server side and would stall every other task pipelined behind it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamInfoGroupsReply, StreamPendingReply, StreamReadReply};
use redis::{AsyncConnectionConfig, Client, cmd};
use tracing::debug;

use super::StreamBroker;
use crate::error::{Error, Result};
use crate::model::{Entry, EntryId, Fields, PendingSummary, StartPosition};

/// Extra time a blocking read may take beyond its BLOCK before the client
/// gives up on the response.
const READ_GRACE: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis client handle, cheap to share behind an `Arc`.
pub struct RedisBroker {
    client: Client,
    conn: ConnectionManager,
    readers: Mutex<HashMap<String, MultiplexedConnection>>,
}

impl RedisBroker {
    /// Connect to Redis. Supports both `redis://` and `rediss://` URLs.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            conn,
            readers: Mutex::new(HashMap::new()),
        })
    }

    /// Connection dedicated to `consumer`'s blocking reads.
    async fn reader(&self, consumer: &str, block: Duration) -> Result<MultiplexedConnection> {
        let cached = self.readers().get(consumer).cloned();
        if let Some(conn) = cached {
            return Ok(conn);
        }
        let config = AsyncConnectionConfig::new()
            .set_response_timeout(block + READ_GRACE)
            .set_connection_timeout(CONNECT_TIMEOUT);
        let conn = self
            .client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;
        debug!(consumer, "opened reader connection");
        self.readers().insert(consumer.to_string(), conn.clone());
        Ok(conn)
    }

    fn drop_reader(&self, consumer: &str) {
        self.readers().remove(consumer);
    }

    fn readers(&self) -> std::sync::MutexGuard<'_, HashMap<String, MultiplexedConnection>> {
        self.readers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn map_group_error(err: redis::RedisError, stream: &str, group: &str) -> Error {
    match err.code() {
        Some("BUSYGROUP") => Error::GroupExists {
            stream: stream.to_string(),
            group: group.to_string(),
        },
        Some("NOGROUP") => Error::UnknownGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        },
        _ => Error::Broker(err),
    }
}

fn parse_optional_id(raw: &str) -> Result<Option<EntryId>> {
    if raw.is_empty() {
        Ok(None)
    } else {
        raw.parse().map(Some)
    }
}

#[async_trait]
impl StreamBroker for RedisBroker {
    async fn append(&self, stream: &str, fields: &Fields) -> Result<EntryId> {
        let mut xadd = cmd("XADD");
        xadd.arg(stream).arg("*");
        for (name, value) in fields {
            xadd.arg(name).arg(value);
        }
        let mut conn = self.conn.clone();
        let id: String = xadd.query_async(&mut conn).await?;
        id.parse()
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
        mkstream: bool,
    ) -> Result<()> {
        let mut create = cmd("XGROUP");
        create.arg("CREATE").arg(stream).arg(group).arg(start.as_arg());
        if mkstream {
            create.arg("MKSTREAM");
        }
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> = create.query_async(&mut conn).await;
        created.map_err(|e| map_group_error(e, stream, group))
    }

    async fn group_exists(&self, stream: &str, group: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        // XINFO GROUPS errors on a missing key; a missing stream has no groups.
        let exists: bool = cmd("EXISTS").arg(stream).query_async(&mut conn).await?;
        if !exists {
            return Ok(false);
        }
        let reply: StreamInfoGroupsReply = cmd("XINFO")
            .arg("GROUPS")
            .arg(stream)
            .query_async(&mut conn)
            .await?;
        Ok(reply.groups.iter().any(|g| g.name == group))
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Entry>> {
        let mut conn = self.reader(consumer, block).await?;
        let mut read = cmd("XREADGROUP");
        read.arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count.max(1));
        if !block.is_zero() {
            read.arg("BLOCK").arg(block.as_millis() as u64);
        }
        read.arg("STREAMS").arg(stream).arg(">");

        let reply: Option<StreamReadReply> = match read.query_async(&mut conn).await {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_io_error() || e.is_timeout() || e.is_connection_dropped() {
                    self.drop_reader(consumer);
                }
                return Err(map_group_error(e, stream, group));
            }
        };

        let mut entries = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for stream_id in key.ids {
                let mut fields = Fields::new();
                for (name, value) in &stream_id.map {
                    fields.insert(name.clone(), redis::from_redis_value(value)?);
                }
                entries.push(Entry {
                    id: stream_id.id.parse()?,
                    fields,
                });
            }
        }
        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64> {
        let mut xack = cmd("XACK");
        xack.arg(stream).arg(group);
        for id in ids {
            xack.arg(id.to_string());
        }
        let mut conn = self.conn.clone();
        Ok(xack.query_async(&mut conn).await?)
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<PendingSummary> {
        let mut conn = self.conn.clone();
        let reply: StreamPendingReply = cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_group_error(e, stream, group))?;

        match reply {
            StreamPendingReply::Empty => Ok(PendingSummary::default()),
            StreamPendingReply::Data(data) => Ok(PendingSummary {
                count: data.count as u64,
                lowest: parse_optional_id(&data.start_id)?,
                highest: parse_optional_id(&data.end_id)?,
                consumers: data
                    .consumers
                    .into_iter()
                    .map(|c| (c.name, c.pending as u64))
                    .collect(),
            }),
        }
    }

    async fn len(&self, stream: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(cmd("XLEN").arg(stream).query_async(&mut conn).await?)
    }
}
