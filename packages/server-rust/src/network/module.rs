//! HTTP server with deferred startup.
//!
//! `new()` allocates shared state, `start()` binds the listener and
//! `serve()` accepts connections until the shutdown future resolves, then
//! drains in-flight enqueues.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::error_handling::HandleErrorLayer;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    enqueue_handler, health_handler, liveness_handler, readiness_handler, services_handler,
    AppState,
};
use super::middleware::{build_http_layers, handle_timeout_error};
use super::shutdown::ShutdownController;
use crate::dispatch::Dispatcher;

/// How long shutdown waits for in-flight enqueues.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<ShutdownController>,
    start_time: Instant,
}

impl NetworkModule {
    #[must_use]
    pub fn new(config: NetworkConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            listener: None,
            dispatcher,
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Routes:
    /// - `POST /enqueue`
    /// - `GET /services`
    /// - `GET /health`, `/health/live`, `/health/ready`
    ///
    /// A request that outlives `request_timeout` gets a `request_timeout`
    /// error body with `503 Service Unavailable`.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            dispatcher: Arc::clone(&self.dispatcher),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
        };

        Router::new()
            .route("/enqueue", post(enqueue_handler))
            .route("/services", get(services_handler))
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(handle_timeout_error))
                    .layer(TimeoutLayer::new(self.config.request_timeout)),
            )
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the listener and returns the bound port, which differs from the
    /// configured one when that is 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();
        let controller = Arc::clone(&self.shutdown);

        controller.set_ready();
        info!(
            services = self.dispatcher.registry().len(),
            backend = self.dispatcher.queue_backend(),
            "serving"
        );

        let draining = Arc::clone(&controller);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                draining.trigger_shutdown();
                info!("shutdown signal received, draining");
            })
            .await?;

        if controller.wait_for_drain(DRAIN_TIMEOUT).await {
            info!("drained");
        } else {
            warn!(
                in_flight = controller.in_flight_count(),
                "drain timed out with requests in flight"
            );
        }
        Ok(())
    }
}
