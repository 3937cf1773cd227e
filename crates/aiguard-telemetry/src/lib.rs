//! Prometheus metrics and structured logging for aiguard.
//!
//! - Prometheus metrics for network health, AI health, readiness, retries
//!   and exit decisions
//! - Structured logging with tracing (JSON in production, pretty otherwise)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
