//! Network health tracking for outbound calls.
//!
//! Records call outcomes and derives a tri-state connectivity badge from the
//! time since the last successful call and the kind of the last error.
//!
//! Badge ladder:
//! - Red: proxy unreachable, an error is recorded, or no success for > 60s
//! - Yellow: no success for > 30s
//! - Green: otherwise

use aiguard_core::{now_ms, CallError, ErrorKind};
use aiguard_telemetry::Metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{NetError, NetResult};

/// Connectivity badge shown by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthBadge {
    Green,
    Yellow,
    Red,
}

impl HealthBadge {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
        }
    }
}

impl fmt::Display for HealthBadge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for badge derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHealthConfig {
    /// Time since last success after which the badge turns yellow (ms).
    #[serde(default = "default_yellow_after_ms")]
    pub yellow_after_ms: i64,

    /// Time since last success after which the badge turns red (ms).
    #[serde(default = "default_red_after_ms")]
    pub red_after_ms: i64,
}

fn default_yellow_after_ms() -> i64 {
    30_000
}

fn default_red_after_ms() -> i64 {
    60_000
}

impl Default for NetworkHealthConfig {
    fn default() -> Self {
        Self {
            yellow_after_ms: default_yellow_after_ms(),
            red_after_ms: default_red_after_ms(),
        }
    }
}

impl NetworkHealthConfig {
    /// Thresholds must be positive and ordered.
    pub fn validate(&self) -> NetResult<()> {
        if self.yellow_after_ms <= 0 || self.red_after_ms <= self.yellow_after_ms {
            return Err(NetError::InvalidHealthConfig(format!(
                "expected 0 < yellow_after_ms < red_after_ms, got {} / {}",
                self.yellow_after_ms, self.red_after_ms
            )));
        }
        Ok(())
    }
}

/// Process-wide network status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// Timestamp of the last successful call (Unix milliseconds).
    pub last_successful_call: i64,
    /// Message of the last recorded error, cleared by a success.
    pub last_error: Option<String>,
    /// Kind of the last recorded error.
    pub last_error_kind: Option<ErrorKind>,
    /// Whether the exchange proxy is reachable.
    pub proxy_reachable: bool,
    /// Whether a server rate limit is in force.
    pub rate_limit_active: bool,
    /// When the rate limit lifts (Unix milliseconds).
    pub rate_limit_retry_after: Option<i64>,
}

impl NetworkStatus {
    fn new(now_ms: i64) -> Self {
        Self {
            last_successful_call: now_ms,
            last_error: None,
            last_error_kind: None,
            proxy_reachable: true,
            rate_limit_active: false,
            rate_limit_retry_after: None,
        }
    }

    /// Copy with an expired rate limit reported as inactive.
    fn normalized(&self, now_ms: i64) -> Self {
        let mut status = self.clone();
        if status
            .rate_limit_retry_after
            .is_some_and(|until| until <= now_ms)
        {
            status.rate_limit_active = false;
            status.rate_limit_retry_after = None;
        }
        status
    }
}

/// Tracks outbound-call outcomes and derives the connectivity badge.
///
/// Every mutation updates the status and notifies subscribers under a single
/// lock acquisition, so no observer sees an intermediate state.
pub struct NetworkHealthTracker {
    config: NetworkHealthConfig,
    status: Mutex<NetworkStatus>,
    tx: watch::Sender<NetworkStatus>,
}

impl NetworkHealthTracker {
    /// Create a tracker whose last success is "now".
    #[must_use]
    pub fn new(config: NetworkHealthConfig) -> Self {
        Self::starting_at(config, now_ms())
    }

    /// Create a tracker whose last success is `now_ms`.
    #[must_use]
    pub fn starting_at(config: NetworkHealthConfig, now_ms: i64) -> Self {
        let status = NetworkStatus::new(now_ms);
        let (tx, _rx) = watch::channel(status.clone());
        Self {
            config,
            status: Mutex::new(status),
            tx,
        }
    }

    /// Subscribe to status changes. Drop the receiver to unsubscribe.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }

    /// Record a successful call now.
    pub fn record_success(&self) {
        self.record_success_at(now_ms());
    }

    /// Record a successful call at `now_ms`.
    pub fn record_success_at(&self, now_ms: i64) {
        let mut status = self.status.lock();
        let recovered = status.last_error.is_some() || !status.proxy_reachable;

        status.last_successful_call = now_ms;
        status.last_error = None;
        status.last_error_kind = None;
        status.proxy_reachable = true;
        status.rate_limit_active = false;
        status.rate_limit_retry_after = None;

        if recovered {
            info!("Network recovered");
        }
        self.publish(&status, now_ms);
    }

    /// Record a failed call now.
    pub fn record_error(&self, error: &CallError) {
        self.record_error_at(error, now_ms());
    }

    /// Record a failed call at `now_ms`.
    ///
    /// Rate-limit errors arm the rate-limit flag with an absolute retry-after
    /// (at least one second in the future). Transport errors mark the proxy
    /// unreachable. Other kinds only record the message.
    pub fn record_error_at(&self, error: &CallError, now_ms: i64) {
        let kind = error.kind();
        let mut status = self.status.lock();

        status.last_error = Some(error.to_string());
        status.last_error_kind = Some(kind);

        match error {
            CallError::RateLimited { retry_after_secs } => {
                let wait_ms = (*retry_after_secs).max(1).saturating_mul(1_000) as i64;
                status.rate_limit_active = true;
                status.rate_limit_retry_after = Some(now_ms.saturating_add(wait_ms));
                warn!(retry_after_secs, "Rate limit active");
            }
            CallError::Transport(reason) => {
                if status.proxy_reachable {
                    warn!(reason = %reason, "Proxy unreachable");
                }
                status.proxy_reachable = false;
            }
            _ => {
                debug!(kind = %kind, error = %error, "Call error recorded");
            }
        }

        Metrics::call_error(kind.as_str());
        self.publish(&status, now_ms);
    }

    fn publish(&self, status: &NetworkStatus, now_ms: i64) {
        Metrics::network_badge(self.badge_for(status, now_ms).as_str());
        self.tx.send_replace(status.clone());
    }

    /// Current status now.
    pub fn status(&self) -> NetworkStatus {
        self.status_at(now_ms())
    }

    /// Current status at `now_ms`, with an expired rate limit cleared.
    pub fn status_at(&self, now_ms: i64) -> NetworkStatus {
        self.status.lock().normalized(now_ms)
    }

    /// Whether a rate limit is in force at `now_ms`.
    pub fn is_rate_limited_at(&self, now_ms: i64) -> bool {
        self.status_at(now_ms).rate_limit_active
    }

    /// Whether a rate limit is in force now.
    pub fn is_rate_limited(&self) -> bool {
        self.is_rate_limited_at(now_ms())
    }

    /// Milliseconds until the rate limit lifts (0 if none).
    pub fn rate_limit_remaining_ms(&self, now_ms: i64) -> i64 {
        self.status_at(now_ms)
            .rate_limit_retry_after
            .map_or(0, |until| (until - now_ms).max(0))
    }

    /// Whether the exchange proxy is reachable.
    pub fn is_proxy_reachable(&self) -> bool {
        self.status.lock().proxy_reachable
    }

    /// Derive the badge now.
    pub fn derive_badge(&self) -> HealthBadge {
        self.derive_badge_at(now_ms())
    }

    /// Derive the badge at `now_ms`.
    pub fn derive_badge_at(&self, now_ms: i64) -> HealthBadge {
        let status = self.status.lock();
        self.badge_for(&status, now_ms)
    }

    fn badge_for(&self, status: &NetworkStatus, now_ms: i64) -> HealthBadge {
        if !status.proxy_reachable || status.last_error.is_some() {
            return HealthBadge::Red;
        }

        let elapsed = now_ms.saturating_sub(status.last_successful_call);
        if elapsed > self.config.red_after_ms {
            HealthBadge::Red
        } else if elapsed > self.config.yellow_after_ms {
            HealthBadge::Yellow
        } else {
            HealthBadge::Green
        }
    }
}

impl Default for NetworkHealthTracker {
    fn default() -> Self {
        Self::new(NetworkHealthConfig::default())
    }
}
