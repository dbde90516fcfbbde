//! Log output and optional OTLP export.
//!
//! Every run writes human-readable lines to stderr. When an OTLP endpoint
//! is set, the same spans and events are also shipped to a collector along
//! with the counters in [`metrics`].

pub mod entry;
pub mod metrics;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, MetricExporter, SpanExporter, WithExportConfig as _};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::error::{Error, Result};

/// Instrumentation scope for spans emitted by this crate.
const TRACER_NAME: &str = "orderflow";

/// Where and how to report.
pub struct TelemetryConfig {
    /// OTLP gRPC collector, e.g. `http://localhost:4317`. `None` keeps
    /// everything on stderr.
    pub endpoint: Option<String>,
    pub service_name: String,
    /// Filter directives applied when `RUST_LOG` is unset.
    pub log_level: String,
}

/// The three SDK pipelines feeding one collector.
struct Exporters {
    traces: SdkTracerProvider,
    metrics: SdkMeterProvider,
    logs: SdkLoggerProvider,
}

impl Exporters {
    fn connect(endpoint: &str, service_name: &str) -> Result<Self> {
        let resource = Resource::builder()
            .with_service_name(service_name.to_string())
            .build();

        let spans = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| export_error("span", e))?;
        let samples = MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| export_error("metric", e))?;
        let records = LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| export_error("log", e))?;

        Ok(Self {
            traces: SdkTracerProvider::builder()
                .with_batch_exporter(spans)
                .with_resource(resource.clone())
                .build(),
            metrics: SdkMeterProvider::builder()
                .with_periodic_exporter(samples)
                .with_resource(resource.clone())
                .build(),
            logs: SdkLoggerProvider::builder()
                .with_batch_exporter(records)
                .with_resource(resource)
                .build(),
        })
    }

    fn flush(&self) {
        let _ = self.traces.force_flush();
        let _ = self.metrics.force_flush();
        let _ = self.logs.force_flush();
    }

    // Logs go first so records emitted while closing spans still have
    // somewhere to land.
    fn shutdown(&self) {
        let _ = self.logs.shutdown();
        let _ = self.metrics.shutdown();
        let _ = self.traces.shutdown();
    }
}

fn export_error(signal: &str, err: impl std::fmt::Display) -> Error {
    Error::Other(format!("could not build the OTLP {signal} exporter: {err}"))
}

/// Keeps the export pipelines alive. Dropping it flushes and closes them.
pub struct TelemetryGuard {
    exporters: Option<Exporters>,
}

impl TelemetryGuard {
    /// Push out whatever is buffered. A no-op without an endpoint.
    pub fn force_flush(&self) {
        if let Some(exporters) = &self.exporters {
            exporters.flush();
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(exporters) = self.exporters.take() {
            exporters.shutdown();
        }
    }
}

/// Parse filter directives such as `info` or `orderflow=debug,redis=warn`.
pub fn log_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| Error::Config(format!("invalid log level {directives:?}: {e}")))
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.log_level`. Fails if the level does not
/// parse, an exporter cannot be built, or a subscriber is already set.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => log_filter(&config.log_level)?,
    };

    let exporters = config
        .endpoint
        .as_deref()
        .map(|endpoint| Exporters::connect(endpoint, &config.service_name))
        .transpose()?;

    let spans = exporters.as_ref().map(|e| {
        tracing_opentelemetry::layer().with_tracer(e.traces.tracer(TRACER_NAME))
    });
    let records = exporters
        .as_ref()
        .map(|e| OpenTelemetryTracingBridge::new(&e.logs));
    if let Some(e) = &exporters {
        opentelemetry::global::set_meter_provider(e.metrics.clone());
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(spans)
        .with(records)
        .try_init()
        .map_err(|e| Error::Other(format!("tracing subscriber already installed: {e}")))?;

    Ok(TelemetryGuard { exporters })
}
