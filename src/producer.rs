//! Producer task: synthesizes order events and appends them to the stream.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::StreamBroker;
use crate::error::Result;
use crate::model::{EntryId, OrderEvent};
use crate::retry::{Backoff, pause, random_delay};
use crate::telemetry::metrics;

/// Pacing for a producer.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Pause after each successful append is random in `[0, max_pause)`.
    pub max_pause: Duration,
    /// Wait applied after a failed append.
    pub backoff: Backoff,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_pause: Duration::from_millis(1500),
            backoff: Backoff::default(),
        }
    }
}

pub struct Producer {
    id: usize,
    broker: Arc<dyn StreamBroker>,
    stream: String,
    config: ProducerConfig,
}

impl Producer {
    pub fn new(
        id: usize,
        broker: Arc<dyn StreamBroker>,
        stream: impl Into<String>,
        config: ProducerConfig,
    ) -> Self {
        Self {
            id,
            broker,
            stream: stream.into(),
            config,
        }
    }

    /// Append one random order. Failures are logged and returned.
    pub async fn produce_once(&self) -> Result<(EntryId, OrderEvent)> {
        let order = OrderEvent::random();
        match self.broker.append(&self.stream, &order.to_fields()).await {
            Ok(entry_id) => {
                metrics::record_stream_operation(&self.stream, "append", "ok");
                info!(
                    producer = self.id,
                    %entry_id,
                    order_id = order.order_id,
                    customer = %order.customer,
                    "added order"
                );
                Ok((entry_id, order))
            }
            Err(e) => {
                metrics::record_stream_operation(&self.stream, "append", "error");
                warn!(producer = self.id, error = %e, "failed to add order");
                Err(e)
            }
        }
    }

    /// Append orders until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(producer = self.id, stream = %self.stream, "producer started");
        let mut backoff = self.config.backoff.clone();

        while !cancel.is_cancelled() {
            let delay = match self.produce_once().await {
                Ok(_) => {
                    backoff.reset();
                    random_delay(self.config.max_pause)
                }
                Err(_) => backoff.next_delay(),
            };
            if !pause(&cancel, delay).await {
                break;
            }
        }

        info!(producer = self.id, "producer stopped");
    }
}
