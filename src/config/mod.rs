//! Typed configuration from environment variables.
//!
//! Loads once at startup. Every variable is optional and falls back to the
//! built-in defaults; a value that is present but unparseable fails fast.
//! The broker URL is wrapped in `secrecy::SecretString` because it may
//! carry a password.

use crate::error::{Error, Result};
use secrecy::SecretString;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_STREAM: &str = "orders";
pub const DEFAULT_GROUP: &str = "order-consumer-group";
pub const DEFAULT_PRODUCERS: usize = 2;
pub const DEFAULT_CONSUMERS: usize = 3;

#[derive(Debug)]
pub struct Config {
    pub redis_url: SecretString,
    pub stream: String,
    pub group: String,
    pub producers: usize,
    pub consumers: usize,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            redis_url: SecretString::from(var_or("REDIS_URL", DEFAULT_REDIS_URL)),
            stream: var_or("ORDERFLOW_STREAM", DEFAULT_STREAM),
            group: var_or("ORDERFLOW_GROUP", DEFAULT_GROUP),
            producers: count_var("ORDERFLOW_PRODUCERS", DEFAULT_PRODUCERS)?,
            consumers: count_var("ORDERFLOW_CONSUMERS", DEFAULT_CONSUMERS)?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: var_or("LOG_LEVEL", "info"),
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn count_var(name: &str, default: usize) -> Result<usize> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            Error::Config(format!("{name} must be a non-negative integer, got {raw:?}"))
        }),
        Err(_) => Ok(default),
    }
}
