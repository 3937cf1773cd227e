//! aiguard host process.
//!
//! Composition root for the resilience and readiness layer:
//! - HTTP adapters for the signal service and the exchange proxy
//! - Proxy probe feeding network health and readiness
//! - Portfolio refresh with backoff, staleness watchdog
//! - Periodic health refresh, dashboard and exit monitor

pub mod adapters;
pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
