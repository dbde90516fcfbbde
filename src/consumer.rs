//! Consumer task: claims new entries for its group, processes them, and
//! acknowledges the ones that succeed.
//!
//! Delivery is at-least-once. An entry that is not acknowledged (a simulated
//! failure, an undecodable payload, or a failed XACK) stays pending for this
//! consumer; nothing here reclaims it.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, warn};

use crate::broker::StreamBroker;
use crate::error::Result;
use crate::model::{Entry, OrderEvent};
use crate::retry::{Backoff, pause, random_delay};
use crate::telemetry::entry::{record_outcome, start_entry_span};
use crate::telemetry::metrics;

/// Read and processing parameters for a consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// How long one claim-read waits for new entries.
    pub block: Duration,
    /// Entries claimed per read.
    pub count: usize,
    /// Simulated processing latency is random in `[0, max_processing)`.
    pub max_processing: Duration,
    /// Wait applied after a failed read.
    pub backoff: Backoff,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            block: Duration::from_secs(5),
            count: 1,
            max_processing: Duration::from_millis(1000),
            backoff: Backoff::default(),
        }
    }
}

/// What happened to one delivered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Processed and resolved for the group.
    Acknowledged,
    /// Even order ID: processing failed on purpose, entry left pending.
    SimulatedFailure,
    /// Fields did not decode into an order, entry left pending.
    Undecodable,
    /// Processed, but XACK failed; entry still pending.
    AckFailed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Acknowledged => "acknowledged",
            Outcome::SimulatedFailure => "simulated_failure",
            Outcome::Undecodable => "undecodable",
            Outcome::AckFailed => "ack_failed",
        }
    }
}

/// Tally of one claim-read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub delivered: usize,
    pub acknowledged: usize,
    pub failed: usize,
    pub undecodable: usize,
    pub ack_failed: usize,
}

impl PollReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Acknowledged => self.acknowledged += 1,
            Outcome::SimulatedFailure => self.failed += 1,
            Outcome::Undecodable => self.undecodable += 1,
            Outcome::AckFailed => self.ack_failed += 1,
        }
    }
}

pub struct Consumer {
    name: String,
    broker: Arc<dyn StreamBroker>,
    stream: String,
    group: String,
    config: ConsumerConfig,
}

impl Consumer {
    /// Create consumer `consumer-<id>` of `group`.
    pub fn new(
        id: usize,
        broker: Arc<dyn StreamBroker>,
        stream: impl Into<String>,
        group: impl Into<String>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            name: format!("consumer-{id}"),
            broker,
            stream: stream.into(),
            group: group.into(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// One claim-read plus processing of everything it delivered.
    ///
    /// A read that times out yields an empty report. Read errors are
    /// returned; processing errors never are.
    pub async fn poll_once(&self) -> Result<PollReport> {
        let entries = match self
            .broker
            .read_group(
                &self.stream,
                &self.group,
                &self.name,
                self.config.count,
                self.config.block,
            )
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                metrics::record_stream_operation(&self.stream, "read", "error");
                return Err(e);
            }
        };

        let mut report = PollReport::default();
        if entries.is_empty() {
            metrics::record_stream_operation(&self.stream, "read", "empty");
            return Ok(report);
        }
        metrics::record_stream_operation(&self.stream, "read", "ok");

        for entry in &entries {
            report.delivered += 1;
            report.record(self.process(entry).await);
        }
        Ok(report)
    }

    /// Process one delivered entry and settle it with the broker.
    pub async fn process(&self, entry: &Entry) -> Outcome {
        let span = start_entry_span(&self.stream, &self.name, &entry.id);
        let started = Instant::now();

        let outcome = self.handle(entry).instrument(span.clone()).await;

        record_outcome(&span, outcome.as_str());
        metrics::entry_outcomes().add(1, &[KeyValue::new("outcome", outcome.as_str())]);
        metrics::processing_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &[]);
        outcome
    }

    async fn handle(&self, entry: &Entry) -> Outcome {
        let order = match OrderEvent::from_fields(&entry.fields) {
            Ok(order) => order,
            Err(e) => {
                warn!(
                    consumer = %self.name,
                    entry_id = %entry.id,
                    error = %e,
                    "cannot decode entry, leaving it pending"
                );
                return Outcome::Undecodable;
            }
        };

        info!(
            consumer = %self.name,
            entry_id = %entry.id,
            order_id = order.order_id,
            customer = %order.customer,
            "processing order"
        );
        tokio::time::sleep(random_delay(self.config.max_processing)).await;

        if order.is_even() {
            warn!(
                consumer = %self.name,
                entry_id = %entry.id,
                order_id = order.order_id,
                "failed to process entry"
            );
            return Outcome::SimulatedFailure;
        }

        match self.broker.ack(&self.stream, &self.group, &[entry.id]).await {
            Ok(resolved) => {
                metrics::record_stream_operation(&self.stream, "ack", "ok");
                info!(consumer = %self.name, entry_id = %entry.id, resolved, "acknowledged entry");
                Outcome::Acknowledged
            }
            Err(e) => {
                metrics::record_stream_operation(&self.stream, "ack", "error");
                warn!(
                    consumer = %self.name,
                    entry_id = %entry.id,
                    error = %e,
                    "failed to acknowledge entry"
                );
                Outcome::AckFailed
            }
        }
    }

    /// Claim and process entries until cancelled.
    ///
    /// Cancellation is checked between reads. A read in flight finishes
    /// (within `block`) and its entries are processed before stopping.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(consumer = %self.name, group = %self.group, "consumer started");
        let mut backoff = self.config.backoff.clone();

        while !cancel.is_cancelled() {
            match self.poll_once().await {
                Ok(_) => backoff.reset(),
                Err(e) => {
                    warn!(consumer = %self.name, error = %e, "error reading from stream");
                    if !pause(&cancel, backoff.next_delay()).await {
                        break;
                    }
                }
            }
        }

        info!(consumer = %self.name, "consumer stopped");
    }
}
