//! Candidate Error Manager.
//!
//! Tracks per-symbol AI signal outcomes and temporarily blacklists symbols
//! that keep failing. Blacklists expire lazily: an expired entry is purged on
//! the next read, no timer is involved.
//!
//! Design:
//! - Consecutive errors >= error_threshold → blacklist for cooldown_ms
//! - Success resets the consecutive counter but never shortens a blacklist
//! - Transport errors count towards the success rate but never towards a
//!   symbol blacklist (they describe the proxy, not the asset)
//! - Global success rate = successes / (successes + errors), 1.0 when empty

use std::collections::HashMap;
use std::fmt;

use aiguard_core::{now_ms, ErrorKind, Symbol};
use aiguard_telemetry::Metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{RiskError, RiskResult};

/// Configuration for the Candidate Error Manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateConfig {
    /// Consecutive errors that trigger a blacklist.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,

    /// Blacklist duration (ms).
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: i64,

    /// Success rate below this is Critical.
    #[serde(default = "default_critical_below")]
    pub critical_below: f64,

    /// Success rate below this is Degraded.
    #[serde(default = "default_degraded_below")]
    pub degraded_below: f64,

    /// More active blacklists than this is Degraded.
    #[serde(default = "default_max_blacklists_healthy")]
    pub max_blacklists_healthy: usize,
}

fn default_error_threshold() -> u32 {
    5
}
fn default_cooldown_ms() -> i64 {
    10 * 60 * 1000
}
fn default_critical_below() -> f64 {
    0.6
}
fn default_degraded_below() -> f64 {
    0.8
}
fn default_max_blacklists_healthy() -> usize {
    5
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
            cooldown_ms: default_cooldown_ms(),
            critical_below: default_critical_below(),
            degraded_below: default_degraded_below(),
            max_blacklists_healthy: default_max_blacklists_healthy(),
        }
    }
}

impl CandidateConfig {
    /// Validate thresholds.
    pub fn validate(&self) -> RiskResult<()> {
        if self.error_threshold == 0 {
            return Err(RiskError::ConfigError(
                "error_threshold must be at least 1".to_string(),
            ));
        }
        if self.cooldown_ms <= 0 {
            return Err(RiskError::ConfigError(format!(
                "cooldown_ms must be positive, got {}",
                self.cooldown_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.critical_below)
            || !(0.0..=1.0).contains(&self.degraded_below)
            || self.critical_below > self.degraded_below
        {
            return Err(RiskError::ConfigError(format!(
                "expected 0 <= critical_below ({}) <= degraded_below ({}) <= 1",
                self.critical_below, self.degraded_below
            )));
        }
        Ok(())
    }
}

/// Per-symbol outcome ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolHealthRecord {
    pub consecutive_errors: u32,
    pub total_errors: u64,
    pub total_successes: u64,
    pub blacklisted_until: Option<i64>,
    pub fallback_used: bool,
    pub last_error_kind: Option<ErrorKind>,
}

impl SymbolHealthRecord {
    /// Blacklisted iff the deadline exists and is in the future.
    pub fn is_blacklisted_at(&self, now_ms: i64) -> bool {
        self.blacklisted_until.is_some_and(|until| until > now_ms)
    }

    fn purge_expired(&mut self, now_ms: i64) -> bool {
        match self.blacklisted_until {
            Some(until) if until <= now_ms => {
                self.blacklisted_until = None;
                true
            }
            _ => false,
        }
    }
}

/// Aggregated counters across all symbols.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalAIHealthMetrics {
    pub total_errors: u64,
    pub total_successes: u64,
    pub active_blacklists: usize,
    pub fallbacks_used: usize,
}

impl GlobalAIHealthMetrics {
    /// successes / (successes + errors), 1.0 with no data.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_errors + self.total_successes;
        if total == 0 {
            return 1.0;
        }
        self.total_successes as f64 / total as f64
    }
}

/// Overall AI health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiHealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl AiHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for AiHealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health snapshot consumed by the UI and the screening pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiHealthSnapshot {
    pub success_rate: f64,
    pub status: AiHealthStatus,
    pub active_blacklists: usize,
    pub fallbacks_used: usize,
    pub total_errors: u64,
    pub total_successes: u64,
    /// Last outcome recorded (ms), 0 if none.
    pub last_update: i64,
}

#[derive(Debug, Default)]
struct Ledger {
    records: HashMap<Symbol, SymbolHealthRecord>,
    last_update: i64,
}

impl Ledger {
    fn metrics_at(&self, now_ms: i64) -> GlobalAIHealthMetrics {
        self.records
            .values()
            .fold(GlobalAIHealthMetrics::default(), |mut acc, r| {
                acc.total_errors += r.total_errors;
                acc.total_successes += r.total_successes;
                if r.is_blacklisted_at(now_ms) {
                    acc.active_blacklists += 1;
                }
                if r.fallback_used {
                    acc.fallbacks_used += 1;
                }
                acc
            })
    }
}

/// Candidate Error Manager.
///
/// Thread-safe; share one instance via `Arc`.
pub struct CandidateErrorManager {
    config: CandidateConfig,
    ledger: Mutex<Ledger>,
}

impl CandidateErrorManager {
    /// Create a new manager with given config.
    pub fn new(config: CandidateConfig) -> Self {
        Self {
            config,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &CandidateConfig {
        &self.config
    }

    /// Record a failed signal call for `symbol`.
    ///
    /// Returns true if this error blacklisted the symbol.
    pub fn record_error(&self, symbol: &Symbol, kind: ErrorKind) -> bool {
        self.record_error_at(symbol, kind, now_ms())
    }

    pub fn record_error_at(&self, symbol: &Symbol, kind: ErrorKind, now_ms: i64) -> bool {
        let mut ledger = self.ledger.lock();
        ledger.last_update = now_ms;
        let record = ledger.records.entry(symbol.clone()).or_default();
        record.purge_expired(now_ms);
        record.total_errors += 1;
        record.last_error_kind = Some(kind);

        // Proxy outages lower the success rate but never blacklist the asset.
        if !kind.counts_against_symbol() {
            tracing::debug!(%symbol, %kind, "Error not counted against symbol");
            Self::publish_locked(&ledger, now_ms);
            return false;
        }
        record.consecutive_errors += 1;

        let blacklisted = !record.is_blacklisted_at(now_ms)
            && record.consecutive_errors >= self.config.error_threshold;
        if blacklisted {
            let until = now_ms + self.config.cooldown_ms;
            record.blacklisted_until = Some(until);
            tracing::warn!(
                %symbol,
                %kind,
                consecutive_errors = record.consecutive_errors,
                blacklisted_until = until,
                "Symbol blacklisted"
            );
            record.consecutive_errors = 0;
            Metrics::symbol_blacklisted();
        } else {
            tracing::debug!(
                %symbol,
                %kind,
                consecutive_errors = record.consecutive_errors,
                "Symbol error recorded"
            );
        }

        Self::publish_locked(&ledger, now_ms);
        blacklisted
    }

    /// Record a successful signal call for `symbol`.
    pub fn record_success(&self, symbol: &Symbol) {
        self.record_success_at(symbol, now_ms());
    }

    pub fn record_success_at(&self, symbol: &Symbol, now_ms: i64) {
        let mut ledger = self.ledger.lock();
        ledger.last_update = now_ms;
        let record = ledger.records.entry(symbol.clone()).or_default();
        record.consecutive_errors = 0;
        record.total_successes += 1;
        record.fallback_used = false;
        Self::publish_locked(&ledger, now_ms);
    }

    /// Mark that the last signal for `symbol` came from the fallback path.
    pub fn record_fallback(&self, symbol: &Symbol) {
        self.record_fallback_at(symbol, now_ms());
    }

    pub fn record_fallback_at(&self, symbol: &Symbol, now_ms: i64) {
        let mut ledger = self.ledger.lock();
        ledger.last_update = now_ms;
        ledger
            .records
            .entry(symbol.clone())
            .or_default()
            .fallback_used = true;
        tracing::debug!(%symbol, "Fallback signal used");
        Self::publish_locked(&ledger, now_ms);
    }

    /// Check whether `symbol` is blacklisted, purging an expired entry.
    pub fn is_blacklisted(&self, symbol: &Symbol) -> bool {
        self.is_blacklisted_at(symbol, now_ms())
    }

    pub fn is_blacklisted_at(&self, symbol: &Symbol, now_ms: i64) -> bool {
        let mut ledger = self.ledger.lock();
        let Some(record) = ledger.records.get_mut(symbol) else {
            return false;
        };
        if record.purge_expired(now_ms) {
            tracing::info!(%symbol, "Blacklist expired");
            return false;
        }
        record.is_blacklisted_at(now_ms)
    }

    /// Manually lift a blacklist. Also resets the consecutive counter.
    ///
    /// Returns true if the symbol was blacklisted.
    pub fn clear_blacklist(&self, symbol: &Symbol) -> bool {
        self.clear_blacklist_at(symbol, now_ms())
    }

    pub fn clear_blacklist_at(&self, symbol: &Symbol, now_ms: i64) -> bool {
        let mut ledger = self.ledger.lock();
        let Some(record) = ledger.records.get_mut(symbol) else {
            return false;
        };
        let was_blacklisted = record.is_blacklisted_at(now_ms);
        record.blacklisted_until = None;
        record.consecutive_errors = 0;
        if was_blacklisted {
            tracing::info!(%symbol, "Blacklist cleared manually");
        }
        Self::publish_locked(&ledger, now_ms);
        was_blacklisted
    }

    /// Copy of the record for `symbol`.
    pub fn record(&self, symbol: &Symbol) -> Option<SymbolHealthRecord> {
        self.ledger.lock().records.get(symbol).cloned()
    }

    /// Currently blacklisted symbols with their deadlines.
    pub fn blacklisted_at(&self, now_ms: i64) -> Vec<(Symbol, i64)> {
        let ledger = self.ledger.lock();
        let mut out: Vec<(Symbol, i64)> = ledger
            .records
            .iter()
            .filter_map(|(s, r)| match r.blacklisted_until {
                Some(until) if until > now_ms => Some((s.clone(), until)),
                _ => None,
            })
            .collect();
        out.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        out
    }

    /// Global success rate, 1.0 with no data.
    pub fn success_rate(&self) -> f64 {
        self.health_metrics_at(now_ms()).success_rate()
    }

    pub fn health_metrics(&self) -> GlobalAIHealthMetrics {
        self.health_metrics_at(now_ms())
    }

    pub fn health_metrics_at(&self, now_ms: i64) -> GlobalAIHealthMetrics {
        self.ledger.lock().metrics_at(now_ms)
    }

    pub fn health_status(&self) -> AiHealthStatus {
        self.health_status_at(now_ms())
    }

    pub fn health_status_at(&self, now_ms: i64) -> AiHealthStatus {
        self.classify(&self.health_metrics_at(now_ms))
    }

    pub fn health_snapshot(&self) -> AiHealthSnapshot {
        self.health_snapshot_at(now_ms())
    }

    pub fn health_snapshot_at(&self, now_ms: i64) -> AiHealthSnapshot {
        let (metrics, last_update) = {
            let ledger = self.ledger.lock();
            (ledger.metrics_at(now_ms), ledger.last_update)
        };
        AiHealthSnapshot {
            success_rate: metrics.success_rate(),
            status: self.classify(&metrics),
            active_blacklists: metrics.active_blacklists,
            fallbacks_used: metrics.fallbacks_used,
            total_errors: metrics.total_errors,
            total_successes: metrics.total_successes,
            last_update,
        }
    }

    /// Filter out blacklisted symbols, preserving order.
    pub fn screenable(&self, symbols: &[Symbol]) -> Vec<Symbol> {
        self.screenable_at(symbols, now_ms())
    }

    pub fn screenable_at(&self, symbols: &[Symbol], now_ms: i64) -> Vec<Symbol> {
        symbols
            .iter()
            .filter(|s| !self.is_blacklisted_at(s, now_ms))
            .cloned()
            .collect()
    }

    fn classify(&self, metrics: &GlobalAIHealthMetrics) -> AiHealthStatus {
        let rate = metrics.success_rate();
        if rate < self.config.critical_below {
            AiHealthStatus::Critical
        } else if rate < self.config.degraded_below
            || metrics.active_blacklists > self.config.max_blacklists_healthy
        {
            AiHealthStatus::Degraded
        } else {
            AiHealthStatus::Healthy
        }
    }

    fn publish_locked(ledger: &Ledger, now_ms: i64) {
        let metrics = ledger.metrics_at(now_ms);
        Metrics::ai_success_rate(metrics.success_rate());
        Metrics::active_blacklists(metrics.active_blacklists);
    }
}
