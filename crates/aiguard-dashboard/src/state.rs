//! Dashboard state.
//!
//! DashboardState holds the shared service handles and builds the API views.

use std::sync::Arc;

use aiguard_core::{now_ms, Symbol};
use aiguard_net::NetworkHealthTracker;
use aiguard_readiness::ReadinessStateMachine;
use aiguard_risk::CandidateErrorManager;

use crate::types::{
    BlacklistEntry, ConnectivityView, HealthResponse, ReadinessView, SnapshotView,
};

/// Handles to the services the dashboard reports on.
#[derive(Clone)]
pub struct DashboardState {
    network: Arc<NetworkHealthTracker>,
    candidates: Arc<CandidateErrorManager>,
    readiness: Arc<ReadinessStateMachine>,
}

impl DashboardState {
    pub fn new(
        network: Arc<NetworkHealthTracker>,
        candidates: Arc<CandidateErrorManager>,
        readiness: Arc<ReadinessStateMachine>,
    ) -> Self {
        Self {
            network,
            candidates,
            readiness,
        }
    }

    pub fn health_at(&self, now_ms: i64) -> HealthResponse {
        HealthResponse {
            timestamp_ms: now_ms,
            connectivity: self.connectivity_at(now_ms),
            ai: self.candidates.health_snapshot_at(now_ms),
            readiness: self.readiness_at(now_ms),
        }
    }

    pub fn health(&self) -> HealthResponse {
        self.health_at(now_ms())
    }

    pub fn connectivity_at(&self, now_ms: i64) -> ConnectivityView {
        let status = self.network.status_at(now_ms);
        ConnectivityView {
            badge: self.network.derive_badge_at(now_ms),
            last_successful_call: status.last_successful_call,
            since_last_success_ms: now_ms.saturating_sub(status.last_successful_call).max(0),
            last_error: status.last_error,
            last_error_kind: status.last_error_kind,
            proxy_reachable: status.proxy_reachable,
            rate_limit_active: status.rate_limit_active,
            rate_limit_retry_after: status.rate_limit_retry_after,
            rate_limit_remaining_ms: self.network.rate_limit_remaining_ms(now_ms),
        }
    }

    pub fn readiness_at(&self, now_ms: i64) -> ReadinessView {
        let status = self.readiness.status_at(now_ms);
        ReadinessView {
            state: status.state,
            reason: status.reason,
            snapshot_age_ms: status.snapshot_age_ms,
            last_ping: status.last_ping,
            retry_count: status.retry_count,
            can_simulate: self.readiness.can_simulate_at(now_ms),
            snapshot: status.snapshot.map(|s| SnapshotView {
                total_usd_value: s.total_usd_value(),
                cash_balance: s.cash_balance(),
                fetched_at: s.fetched_at(),
                positions: s.positions().to_vec(),
            }),
        }
    }

    pub fn blacklist_at(&self, now_ms: i64) -> Vec<BlacklistEntry> {
        self.candidates
            .blacklisted_at(now_ms)
            .into_iter()
            .map(|(symbol, until)| BlacklistEntry {
                symbol: symbol.to_string(),
                blacklisted_until: until,
            })
            .collect()
    }

    /// Manual override from the UI.
    pub fn clear_blacklist(&self, symbol: &Symbol) -> bool {
        self.candidates.clear_blacklist(symbol)
    }
}
