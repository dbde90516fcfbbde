//! # orderflow
//!
//! At-least-once order processing over a consumer-group message stream.
//!
//! Producers append synthetic order events to a stream; competing consumers
//! in one consumer group claim new entries, process them, and acknowledge
//! the ones that succeed. Unacknowledged entries stay pending in the broker.
//! The broker sits behind [`broker::StreamBroker`], with a Redis Streams
//! implementation and an in-memory one.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod group;
pub mod model;
pub mod producer;
pub mod retry;
pub mod supervisor;
pub mod telemetry;
