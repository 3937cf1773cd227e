//! Dashboard API types.
//!
//! These types are used for JSON serialization in the REST API.

use aiguard_core::{ErrorKind, PortfolioPosition};
use aiguard_net::HealthBadge;
use aiguard_readiness::ReadinessState;
use aiguard_risk::AiHealthSnapshot;
use rust_decimal::Decimal;
use serde::Serialize;

/// Everything the UI badge needs in one poll.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Timestamp when the response was built (Unix milliseconds).
    pub timestamp_ms: i64,
    pub connectivity: ConnectivityView,
    pub ai: AiHealthSnapshot,
    pub readiness: ReadinessView,
}

/// Network status plus the derived badge.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityView {
    pub badge: HealthBadge,
    pub last_successful_call: i64,
    /// Milliseconds since the last successful call.
    pub since_last_success_ms: i64,
    pub last_error: Option<String>,
    pub last_error_kind: Option<ErrorKind>,
    pub proxy_reachable: bool,
    pub rate_limit_active: bool,
    pub rate_limit_retry_after: Option<i64>,
    pub rate_limit_remaining_ms: i64,
}

/// Readiness status without the full snapshot internals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessView {
    pub state: ReadinessState,
    pub reason: Option<String>,
    pub snapshot_age_ms: Option<i64>,
    pub last_ping: Option<i64>,
    pub retry_count: u32,
    pub can_simulate: bool,
    pub snapshot: Option<SnapshotView>,
}

/// Portfolio snapshot summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotView {
    pub total_usd_value: Decimal,
    pub cash_balance: Decimal,
    pub fetched_at: i64,
    pub positions: Vec<PortfolioPosition>,
}

/// A currently blacklisted symbol.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistEntry {
    pub symbol: String,
    pub blacklisted_until: i64,
}

/// Result of a manual blacklist clear.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearBlacklistResponse {
    pub symbol: String,
    /// False if the symbol was not blacklisted.
    pub cleared: bool,
}
