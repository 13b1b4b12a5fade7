//! Logging and metrics setup.
//!
//! Logs go through `tracing` with `RUST_LOG` filtering. Metrics are recorded
//! with the `metrics` facade and exported in Prometheus format when a
//! metrics port is configured.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Once;

use clap::ValueEnum;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Metric names.
pub mod names {
    /// Enqueue requests by `service` and `outcome`.
    pub const REQUESTS_TOTAL: &str = "enqueuer_requests_total";
    /// Individual task-creation calls by `service` and `outcome`.
    pub const CREATE_ATTEMPTS_TOTAL: &str = "enqueuer_create_attempts_total";
    /// Latency of task-creation calls by `service`.
    pub const CREATE_DURATION_SECONDS: &str = "enqueuer_create_duration_seconds";
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line, for log aggregation.
    #[default]
    Json,
    /// Human-readable output for local development.
    Pretty,
}

/// Installs the global `tracing` subscriber. Later calls are no-ops.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_current_span(true))
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Starts the Prometheus scrape listener on `0.0.0.0:{port}` and registers
/// metric descriptions.
///
/// # Errors
///
/// Returns an error if the recorder is already installed or the listener
/// cannot be started.
pub fn install_metrics_exporter(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus exporter on {addr}: {e}"))?;

    metrics::describe_counter!(names::REQUESTS_TOTAL, "Enqueue requests by service and outcome");
    metrics::describe_counter!(
        names::CREATE_ATTEMPTS_TOTAL,
        "Task creation calls to the queue by service and outcome"
    );
    metrics::describe_histogram!(
        names::CREATE_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Latency of task creation calls"
    );
    Ok(())
}
