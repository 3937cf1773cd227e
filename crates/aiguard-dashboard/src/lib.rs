//! aiguard-dashboard - HTTP surface for the UI health badge.
//!
//! The UI polls these endpoints (every 30s by default):
//!
//! ```text
//! GET    /api/health            → connectivity + AI health + readiness
//! GET    /api/connectivity      → network status and badge
//! GET    /api/readiness         → readiness status
//! GET    /api/blacklist         → currently blacklisted symbols
//! DELETE /api/blacklist/{symbol} → manual clearBlacklist
//! GET    /metrics               → Prometheus text format
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use aiguard_dashboard::{DashboardConfig, DashboardState, run_server};
//!
//! let state = DashboardState::new(network.clone(), candidates.clone(), readiness.clone());
//! tokio::spawn(async move {
//!     if let Err(e) = run_server(state, DashboardConfig::default()).await {
//!         tracing::error!(error = %e, "Dashboard server failed");
//!     }
//! });
//! ```

mod config;
mod error;
mod server;
mod state;
mod types;

pub use config::DashboardConfig;
pub use error::{DashboardError, DashboardResult};
pub use server::{create_router, run_server};
pub use state::DashboardState;
pub use types::{
    BlacklistEntry, ClearBlacklistResponse, ConnectivityView, HealthResponse, ReadinessView,
    SnapshotView,
};
