//! Prometheus metrics for aiguard.
//!
//! Covers:
//! - Connectivity badge and outbound call errors
//! - AI health (success rate, blacklists)
//! - Readiness state and snapshot age
//! - Retry scheduling
//! - Exit monitor ticks and decisions
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a startup bug; it only happens during
//! lazy static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec, register_int_gauge,
    Counter, CounterVec, Encoder, Gauge, GaugeVec, IntGauge, TextEncoder,
};

use crate::error::TelemetryResult;

/// Connectivity badge (1 = active badge, 0 = inactive).
/// Labels: badge (green/yellow/red)
pub static NETWORK_BADGE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "aiguard_network_badge",
        "Connectivity badge (1=active, 0=inactive)",
        &["badge"]
    )
    .unwrap()
});

/// Outbound call errors by kind.
pub static CALL_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "aiguard_call_errors_total",
        "Outbound call errors by kind",
        &["kind"]
    )
    .unwrap()
});

/// Global AI call success rate (0.0-1.0).
pub static AI_SUCCESS_RATE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("aiguard_ai_success_rate", "Global AI call success rate").unwrap()
});

/// Symbols currently blacklisted.
pub static ACTIVE_BLACKLISTS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "aiguard_active_blacklists",
        "Number of symbols currently blacklisted"
    )
    .unwrap()
});

/// Blacklist activations.
pub static BLACKLIST_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "aiguard_blacklist_total",
        "Total symbol blacklist activations"
    )
    .unwrap()
});

/// Readiness state (1 = current state, 0 = other).
/// Labels: state (idle/fetching/ready/sim_running/unstable)
pub static READINESS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "aiguard_readiness_state",
        "Readiness state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Portfolio snapshot age in milliseconds.
pub static SNAPSHOT_AGE_MS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "aiguard_snapshot_age_ms",
        "Age of the current portfolio snapshot in milliseconds"
    )
    .unwrap()
});

/// Retries armed.
pub static RETRY_SCHEDULED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("aiguard_retry_scheduled_total", "Total retries scheduled").unwrap()
});

/// Retry budgets exhausted.
pub static RETRY_EXHAUSTED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "aiguard_retry_exhausted_total",
        "Total operations that exhausted their retry budget"
    )
    .unwrap()
});

/// Exit monitor ticks by outcome.
/// Labels: outcome (evaluated/inactive/paused/no_positions/gated/overlap)
pub static EXIT_TICKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "aiguard_exit_ticks_total",
        "Exit monitor ticks by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Exit decisions by action.
/// Labels: action (sell/hold)
pub static EXIT_DECISIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "aiguard_exit_decisions_total",
        "Exit decisions by action",
        &["action"]
    )
    .unwrap()
});

const BADGES: [&str; 3] = ["green", "yellow", "red"];

const READINESS_STATES: [&str; 5] = ["idle", "fetching", "ready", "sim_running", "unstable"];

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Set the active connectivity badge.
    pub fn network_badge(badge: &str) {
        for b in BADGES {
            NETWORK_BADGE.with_label_values(&[b]).set(0.0);
        }
        NETWORK_BADGE.with_label_values(&[badge]).set(1.0);
    }

    /// Record an outbound call error.
    pub fn call_error(kind: &str) {
        CALL_ERRORS_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Set the global AI success rate.
    pub fn ai_success_rate(rate: f64) {
        AI_SUCCESS_RATE.set(rate);
    }

    /// Set the number of active blacklists.
    pub fn active_blacklists(count: usize) {
        ACTIVE_BLACKLISTS.set(count as i64);
    }

    /// Record a blacklist activation.
    pub fn symbol_blacklisted() {
        BLACKLIST_TOTAL.inc();
    }

    /// Set the readiness state. Only the active state is 1.
    pub fn readiness_state_set(state: &str) {
        for s in READINESS_STATES {
            READINESS_STATE.with_label_values(&[s]).set(0.0);
        }
        READINESS_STATE.with_label_values(&[state]).set(1.0);
    }

    /// Set the portfolio snapshot age.
    pub fn snapshot_age(age_ms: f64) {
        SNAPSHOT_AGE_MS.set(age_ms);
    }

    /// Record a retry armed.
    pub fn retry_scheduled() {
        RETRY_SCHEDULED_TOTAL.inc();
    }

    /// Record a retry budget exhausted.
    pub fn retry_exhausted() {
        RETRY_EXHAUSTED_TOTAL.inc();
    }

    /// Record an exit monitor tick.
    pub fn exit_tick(outcome: &str) {
        EXIT_TICKS_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Record an exit decision.
    pub fn exit_decision(action: &str) {
        EXIT_DECISIONS_TOTAL.with_label_values(&[action]).inc();
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
