//! Outbound-call resilience for aiguard.
//!
//! Provides:
//! - Exponential backoff retry scheduling with per-key de-duplication
//! - Network health tracking (last success, proxy reachability, rate limits)
//! - Tri-state connectivity badge derived from recency and error type

pub mod error;
pub mod network_health;
pub mod retry;

pub use error::{NetError, NetResult};
pub use network_health::{HealthBadge, NetworkHealthConfig, NetworkHealthTracker, NetworkStatus};
pub use retry::{RetryConfig, RetryOutcome, RetryScheduler, RetryTask};
