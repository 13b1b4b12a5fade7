//! Enqueuer server entry point.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use enqueuer_core::{SystemClock, TaskQueue};
use enqueuer_server::dispatch::{CloudTasksQueue, InMemoryTaskQueue};
use enqueuer_server::observability::{init_logging, install_metrics_exporter};
use enqueuer_server::{AppConfig, Dispatcher, NetworkModule, QueueBackend};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is normal in deployed environments.
    let _ = dotenvy::dotenv();

    let config = AppConfig::parse();
    init_logging(config.log_format);
    config.validate().context("invalid timeout configuration")?;

    if let Some(port) = config.metrics_port {
        install_metrics_exporter(port)?;
        info!(port, "metrics exporter listening");
    }

    let registry = config
        .build_registry(|name| std::env::var(name).ok())
        .context("invalid service configuration")?;
    info!(services = ?registry.names(), "service registry loaded");

    let queue: Arc<dyn TaskQueue> = match config.queue_backend {
        QueueBackend::CloudTasks => Arc::new(
            CloudTasksQueue::connect(config.cloud_tasks_config())
                .await
                .context("failed to initialize Cloud Tasks client")?,
        ),
        QueueBackend::Memory => {
            warn!("using in-memory queue; tasks will not be delivered");
            Arc::new(InMemoryTaskQueue::new())
        }
    };

    let dispatcher = Dispatcher::new(
        Arc::new(registry),
        queue,
        Arc::new(SystemClock),
        config.dispatcher_config(),
    );

    let mut module = NetworkModule::new(config.network_config(), Arc::new(dispatcher));
    module.start().await?;
    module.serve(shutdown_signal()).await
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
