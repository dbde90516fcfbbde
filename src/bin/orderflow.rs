//! orderflow CLI: runs the producers and consumers, or inspects the group.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use orderflow::broker::{InMemoryBroker, RedisBroker, StreamBroker};
use orderflow::config::Config;
use orderflow::group::{GroupInit, ensure_group};
use orderflow::supervisor::{Supervisor, SupervisorConfig, cancel_on};
use orderflow::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "orderflow", about = "At-least-once order processing over a stream")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run producers and consumers until Ctrl-C (the default)
    Run {
        /// Number of producer tasks
        #[arg(long)]
        producers: Option<usize>,
        /// Number of consumer tasks
        #[arg(long)]
        consumers: Option<usize>,
        /// Use an in-process broker instead of Redis
        #[arg(long)]
        in_memory: bool,
    },
    /// Create the consumer group if it does not exist yet
    Init,
    /// Show the consumer group's pending entries
    Pending {
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let telemetry = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "orderflow".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let command = cli.command.unwrap_or(Command::Run {
        producers: None,
        consumers: None,
        in_memory: false,
    });
    let result = match command {
        Command::Run {
            producers,
            consumers,
            in_memory,
        } => cmd_run(&config, producers, consumers, in_memory).await,
        Command::Init => cmd_init(&config).await,
        Command::Pending { json } => cmd_pending(&config, json).await,
    };
    telemetry.force_flush();
    result
}

async fn connect(config: &Config) -> anyhow::Result<RedisBroker> {
    RedisBroker::connect(config.redis_url.expose_secret())
        .await
        .context("could not connect to the stream broker")
}

async fn cmd_run(
    config: &Config,
    producers: Option<usize>,
    consumers: Option<usize>,
    in_memory: bool,
) -> anyhow::Result<()> {
    let broker: Arc<dyn StreamBroker> = if in_memory {
        info!("using in-memory broker");
        Arc::new(InMemoryBroker::new())
    } else {
        Arc::new(connect(config).await?)
    };

    let mut supervisor_config = SupervisorConfig::from(config);
    if let Some(n) = producers {
        supervisor_config.producers = n;
    }
    if let Some(n) = consumers {
        supervisor_config.consumers = n;
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on(tokio::signal::ctrl_c(), cancel.clone()));

    let supervisor = Supervisor::new(broker, supervisor_config);
    if let Err(e) = supervisor.run(cancel).await {
        error!(error = %e, "could not create consumer group");
        return Err(e).context("could not create consumer group");
    }
    Ok(())
}

async fn cmd_init(config: &Config) -> anyhow::Result<()> {
    let broker = connect(config).await?;
    match ensure_group(&broker, &config.stream, &config.group).await? {
        GroupInit::Created => println!("Created group {} on {}", config.group, config.stream),
        GroupInit::Existing => println!("Group {} already exists on {}", config.group, config.stream),
    }
    Ok(())
}

async fn cmd_pending(config: &Config, json: bool) -> anyhow::Result<()> {
    let broker = connect(config).await?;
    let summary = broker.pending(&config.stream, &config.group).await?;
    let length = broker.len(&config.stream).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Stream:   {} ({length} entries)", config.stream);
    println!("Group:    {}", config.group);
    println!("Pending:  {}", summary.count);
    if let (Some(lowest), Some(highest)) = (summary.lowest, summary.highest) {
        println!("Range:    {lowest} .. {highest}");
    }
    if !summary.consumers.is_empty() {
        println!("---");
        for (consumer, pending) in &summary.consumers {
            println!("{consumer:<16}  {pending}");
        }
    }
    Ok(())
}
