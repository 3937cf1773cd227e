//! Position error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Simulation state read failed: {0}")]
    StateRead(#[from] std::io::Error),

    #[error("Simulation state parse failed: {0}")]
    StateParse(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type PositionResult<T> = Result<T, PositionError>;
