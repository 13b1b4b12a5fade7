//! Enqueuer server: HTTP front-end that turns enqueue requests into
//! authenticated, optionally scheduled, deduplicated queue tasks.

pub mod config;
pub mod dispatch;
pub mod network;
pub mod observability;

pub use config::{AppConfig, ConfigError, QueueBackend};
pub use dispatch::{Dispatcher, DispatcherConfig, RetryPolicy};
pub use network::NetworkModule;
