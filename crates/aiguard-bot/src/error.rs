//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Net(#[from] aiguard_net::NetError),

    #[error("Risk error: {0}")]
    Risk(#[from] aiguard_risk::RiskError),

    #[error("Readiness error: {0}")]
    Readiness(#[from] aiguard_readiness::ReadinessError),

    #[error("Position error: {0}")]
    Position(#[from] aiguard_position::PositionError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] aiguard_telemetry::TelemetryError),

    #[error("Dashboard error: {0}")]
    Dashboard(#[from] aiguard_dashboard::DashboardError),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
