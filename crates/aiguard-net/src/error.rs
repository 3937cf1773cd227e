//! Network layer error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("Invalid retry configuration: {0}")]
    InvalidRetryConfig(String),

    #[error("Invalid network health configuration: {0}")]
    InvalidHealthConfig(String),
}

pub type NetResult<T> = Result<T, NetError>;
