//! Dashboard error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("Failed to bind dashboard listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Dashboard server error: {0}")]
    Serve(#[source] std::io::Error),
}

pub type DashboardResult<T> = Result<T, DashboardError>;
