//! Error types for orderflow.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("broker error: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("consumer group {group} already exists on stream {stream}")]
    GroupExists { stream: String, group: String },

    #[error("no consumer group {group} on stream {stream}")]
    UnknownGroup { stream: String, group: String },

    #[error("invalid entry id: {0:?}")]
    InvalidEntryId(String),

    #[error("cannot decode field {field}: {reason}")]
    Decode { field: &'static str, reason: String },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
