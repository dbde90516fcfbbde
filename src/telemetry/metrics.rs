//! Metric instrument factories for orderflow.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"orderflow"` meter.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for orderflow instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("orderflow")
}

/// Counter: stream operations issued against the broker.
/// Labels: `stream`, `operation` ("append" | "read" | "ack"), `result` ("ok" | "empty" | "error").
pub fn stream_operations() -> Counter<u64> {
    meter()
        .u64_counter("orderflow.stream.operations")
        .with_description("Number of stream broker operations")
        .build()
}

/// Counter: processing outcomes per delivered entry.
/// Labels: `outcome` ("acknowledged" | "simulated_failure" | "undecodable" | "ack_failed").
pub fn entry_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("orderflow.entry.outcomes")
        .with_description("Outcomes of processing delivered entries")
        .build()
}

/// Histogram: time spent processing one entry, ack included.
pub fn processing_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("orderflow.entry.processing_duration_ms")
        .with_description("Entry processing duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Record one stream operation.
pub fn record_stream_operation(stream: &str, operation: &'static str, result: &'static str) {
    stream_operations().add(
        1,
        &[
            KeyValue::new("stream", stream.to_string()),
            KeyValue::new("operation", operation),
            KeyValue::new("result", result),
        ],
    );
}
