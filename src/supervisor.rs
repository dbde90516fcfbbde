//! Process supervisor: initializes the group, then runs producers and
//! consumers side by side on one shared broker handle.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::StreamBroker;
use crate::config::{Config, DEFAULT_CONSUMERS, DEFAULT_GROUP, DEFAULT_PRODUCERS, DEFAULT_STREAM};
use crate::consumer::{Consumer, ConsumerConfig};
use crate::error::Result;
use crate::group::ensure_group;
use crate::producer::{Producer, ProducerConfig};

/// Topology and pacing for a supervised run.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub stream: String,
    pub group: String,
    pub producers: usize,
    pub consumers: usize,
    pub producer: ProducerConfig,
    pub consumer: ConsumerConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stream: DEFAULT_STREAM.to_string(),
            group: DEFAULT_GROUP.to_string(),
            producers: DEFAULT_PRODUCERS,
            consumers: DEFAULT_CONSUMERS,
            producer: ProducerConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

impl From<&Config> for SupervisorConfig {
    fn from(config: &Config) -> Self {
        Self {
            stream: config.stream.clone(),
            group: config.group.clone(),
            producers: config.producers,
            consumers: config.consumers,
            ..Self::default()
        }
    }
}

pub struct Supervisor {
    broker: Arc<dyn StreamBroker>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(broker: Arc<dyn StreamBroker>, config: SupervisorConfig) -> Self {
        Self { broker, config }
    }

    /// Ensure the group, spawn every task, and wait for them to stop.
    ///
    /// Returns only after `cancel` fires, even with no tasks configured. A
    /// group initialization failure is returned before anything is spawned.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let SupervisorConfig {
            stream,
            group,
            producers,
            consumers,
            ..
        } = &self.config;

        ensure_group(self.broker.as_ref(), stream, group).await?;

        info!(producers, consumers, %stream, %group, "starting producers and consumers");
        let mut tasks = JoinSet::new();

        for id in 1..=*producers {
            let producer = Producer::new(
                id,
                Arc::clone(&self.broker),
                stream.clone(),
                self.config.producer.clone(),
            );
            let cancel = cancel.clone();
            tasks.spawn(async move { producer.run(cancel).await });
        }

        for id in 1..=*consumers {
            let consumer = Consumer::new(
                id,
                Arc::clone(&self.broker),
                stream.clone(),
                group.clone(),
                self.config.consumer.clone(),
            );
            let cancel = cancel.clone();
            tasks.spawn(async move { consumer.run(cancel).await });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "task ended abnormally");
            }
        }

        cancel.cancelled().await;
        info!("all producers and consumers stopped");
        Ok(())
    }
}

/// Cancel `cancel` once `signal` resolves.
///
/// If the signal cannot be listened for, the token is left alone and the
/// failure is logged; the process then has to be stopped some other way.
pub async fn cancel_on<F>(signal: F, cancel: CancellationToken)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("shutting down");
            cancel.cancel();
        }
        Err(e) => warn!(error = %e, "could not listen for the shutdown signal"),
    }
}
