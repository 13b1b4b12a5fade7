//! Route handlers and the state they share.

pub mod enqueue;
pub mod health;
pub mod services;

pub use enqueue::enqueue_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use services::services_handler;

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;
use crate::dispatch::Dispatcher;

/// State carried through axum's `State` extractor. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Enqueue pipeline, including the read-only service registry.
    pub dispatcher: Arc<Dispatcher>,
    pub shutdown: Arc<ShutdownController>,
    /// Process start, for uptime reporting.
    pub start_time: Instant,
}
