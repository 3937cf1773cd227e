//! Readiness error types.

use aiguard_core::CallError;
use thiserror::Error;

use crate::state::ReadinessState;

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("Invalid transition: {event} not allowed in {from}")]
    InvalidTransition {
        from: ReadinessState,
        event: &'static str,
    },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(#[from] aiguard_core::CoreError),

    #[error("Portfolio fetch failed: {0}")]
    Fetch(#[from] CallError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type ReadinessResult<T> = Result<T, ReadinessError>;
