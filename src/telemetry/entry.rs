//! Entry processing span helpers.
//!
//! One span per delivered entry, carrying the consumer, the entry ID and,
//! once decided, the outcome.

use tracing::Span;

use crate::model::EntryId;

/// Start a span for processing one entry.
///
/// The `entry.outcome` field is declared empty and filled by
/// [`record_outcome`].
pub fn start_entry_span(stream: &str, consumer: &str, entry_id: &EntryId) -> Span {
    tracing::info_span!(
        "entry.process",
        "messaging.destination.name" = stream,
        "messaging.consumer.name" = consumer,
        "entry.id" = %entry_id,
        "entry.outcome" = tracing::field::Empty,
    )
}

/// Record the processing outcome on the entry span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("entry.outcome", outcome);
}
