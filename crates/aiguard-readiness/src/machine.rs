//! Readiness state machine.
//!
//! Owns the authoritative portfolio snapshot and readiness status. All
//! mutations go through [`transition`]; the new status is published on a
//! watch channel under the same lock acquisition, so subscribers never see
//! an intermediate state.

use std::sync::Arc;

use aiguard_core::{now_ms, PortfolioSnapshot};
use aiguard_telemetry::Metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ReadinessError, ReadinessResult};
use crate::state::{transition, ReadinessEvent, ReadinessState, ReadinessStatus};

/// Readiness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Maximum snapshot age before READY becomes UNSTABLE (ms).
    #[serde(default = "default_freshness_ms")]
    pub freshness_ms: i64,
}

fn default_freshness_ms() -> i64 {
    60_000
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            freshness_ms: default_freshness_ms(),
        }
    }
}

impl ReadinessConfig {
    pub fn validate(&self) -> ReadinessResult<()> {
        if self.freshness_ms <= 0 {
            return Err(ReadinessError::ConfigError(format!(
                "freshness_ms must be positive, got {}",
                self.freshness_ms
            )));
        }
        Ok(())
    }
}

/// Readiness state machine.
///
/// # Thread Safety
///
/// Status lives behind a `parking_lot::Mutex` that is never held across an
/// await. Share via `Arc<ReadinessStateMachine>`.
#[derive(Debug)]
pub struct ReadinessStateMachine {
    config: ReadinessConfig,
    status: Mutex<ReadinessStatus>,
    tx: watch::Sender<ReadinessStatus>,
}

impl ReadinessStateMachine {
    /// Create a machine in IDLE.
    ///
    /// Returns the machine and a watch receiver for status changes.
    #[must_use]
    pub fn new(config: ReadinessConfig) -> (Self, watch::Receiver<ReadinessStatus>) {
        let (tx, rx) = watch::channel(ReadinessStatus::default());
        Metrics::readiness_state_set(ReadinessState::Idle.as_str());
        let machine = Self {
            config,
            status: Mutex::new(ReadinessStatus::default()),
            tx,
        };
        (machine, rx)
    }

    pub fn config(&self) -> &ReadinessConfig {
        &self.config
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ReadinessStatus> {
        self.tx.subscribe()
    }

    /// Apply `event`, returning the new state.
    pub fn dispatch(&self, event: ReadinessEvent) -> ReadinessResult<ReadinessState> {
        self.dispatch_at(event, now_ms())
    }

    pub fn dispatch_at(
        &self,
        event: ReadinessEvent,
        now_ms: i64,
    ) -> ReadinessResult<ReadinessState> {
        let mut status = self.status.lock();
        self.apply_locked(&mut status, event, now_ms)
    }

    /// Run one transition with the status lock held by the caller.
    fn apply_locked(
        &self,
        status: &mut ReadinessStatus,
        event: ReadinessEvent,
        now_ms: i64,
    ) -> ReadinessResult<ReadinessState> {
        let name = event.name();
        let from = status.state;

        let next = match transition(status, event, now_ms, self.config.freshness_ms) {
            Ok(next) => next,
            Err(e) => {
                debug!(%from, event = name, "Readiness event rejected");
                return Err(e);
            }
        };

        let to = next.state;
        if to == ReadinessState::Unstable {
            warn!(
                %from,
                %to,
                event = name,
                reason = next.reason.as_deref().unwrap_or(""),
                retry_count = next.retry_count,
                "Readiness degraded"
            );
        } else if from != to {
            info!(%from, %to, event = name, "Readiness state changed");
        }

        Metrics::readiness_state_set(to.as_str());
        if let Some(age) = next.snapshot_age_ms {
            Metrics::snapshot_age(age as f64);
        }

        *status = next.clone();
        self.tx.send_replace(next);
        Ok(to)
    }

    /// Dispatch AGE_EXCEEDED if READY with a stale snapshot.
    ///
    /// Returns true if the machine moved to UNSTABLE.
    pub fn check_staleness(&self) -> bool {
        self.check_staleness_at(now_ms())
    }

    pub fn check_staleness_at(&self, now_ms: i64) -> bool {
        let mut status = self.status.lock();
        if let Some(age) = status.age_at(now_ms) {
            Metrics::snapshot_age(age as f64);
        }
        let stale = status.state == ReadinessState::Ready
            && !status.is_fresh_at(now_ms, self.config.freshness_ms);
        stale
            && self
                .apply_locked(&mut status, ReadinessEvent::AgeExceeded, now_ms)
                .is_ok()
    }

    /// READY with a fresh snapshot.
    #[must_use]
    pub fn can_simulate(&self) -> bool {
        self.can_simulate_at(now_ms())
    }

    #[must_use]
    pub fn can_simulate_at(&self, now_ms: i64) -> bool {
        let status = self.status.lock();
        status.state == ReadinessState::Ready
            && status.is_fresh_at(now_ms, self.config.freshness_ms)
    }

    #[must_use]
    pub fn state(&self) -> ReadinessState {
        self.status.lock().state
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<PortfolioSnapshot>> {
        self.status.lock().snapshot.clone()
    }

    /// Current status with the snapshot age derived at call time.
    #[must_use]
    pub fn status(&self) -> ReadinessStatus {
        self.status_at(now_ms())
    }

    #[must_use]
    pub fn status_at(&self, now_ms: i64) -> ReadinessStatus {
        let mut status = self.status.lock().clone();
        status.snapshot_age_ms = status.age_at(now_ms);
        status
    }

    /// Wait until the machine reaches READY.
    ///
    /// Returns immediately if already READY.
    pub async fn wait_until_ready(&self) {
        let mut rx = self.tx.subscribe();
        if rx.borrow_and_update().state == ReadinessState::Ready {
            return;
        }
        loop {
            if rx.changed().await.is_err() {
                warn!("ReadinessStateMachine sender dropped while waiting");
                return;
            }
            if rx.borrow_and_update().state == ReadinessState::Ready {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const T0: i64 = 1_700_000_000_000;

    fn machine() -> (ReadinessStateMachine, watch::Receiver<ReadinessStatus>) {
        ReadinessStateMachine::new(ReadinessConfig::default())
    }

    fn snapshot(fetched_at: i64) -> Arc<PortfolioSnapshot> {
        Arc::new(PortfolioSnapshot::from_positions(
            Vec::new(),
            dec!(500),
            fetched_at,
        ))
    }

    fn ready_at(m: &ReadinessStateMachine, t: i64) {
        m.dispatch_at(ReadinessEvent::Init, t).unwrap();
        m.dispatch_at(ReadinessEvent::FetchSuccess(snapshot(t)), t)
            .unwrap();
    }

    #[test]
    fn test_new_is_idle() {
        let (m, rx) = machine();
        assert_eq!(m.state(), ReadinessState::Idle);
        assert_eq!(rx.borrow().state, ReadinessState::Idle);
        assert!(!m.can_simulate_at(T0));
    }

    #[test]
    fn test_rejected_event_leaves_status() {
        let (m, _rx) = machine();
        let before = m.status_at(T0);
        assert!(m
            .dispatch_at(ReadinessEvent::StartSimulation, T0)
            .is_err());
        assert_eq!(m.status_at(T0), before);
    }

    #[test]
    fn test_can_simulate_requires_fresh_ready() {
        let (m, _rx) = machine();
        ready_at(&m, T0);
        assert!(m.can_simulate_at(T0 + 1_000));
        assert!(m.can_simulate_at(T0 + 60_000));
        assert!(!m.can_simulate_at(T0 + 60_001));
    }

    #[test]
    fn test_check_staleness() {
        let (m, _rx) = machine();
        ready_at(&m, T0);

        assert!(!m.check_staleness_at(T0 + 59_000));
        assert_eq!(m.state(), ReadinessState::Ready);

        assert!(m.check_staleness_at(T0 + 61_000));
        let status = m.status_at(T0 + 61_000);
        assert_eq!(status.state, ReadinessState::Unstable);
        assert_eq!(status.snapshot_age_ms, Some(61_000));
        assert!(status.snapshot.is_some());

        // Already unstable.
        assert!(!m.check_staleness_at(T0 + 62_000));
    }

    #[test]
    fn test_late_age_exceeded_does_not_demote_fresh_snapshot() {
        let (m, _rx) = machine();
        ready_at(&m, T0);

        // Stale at T0 + 61s, but a refresh lands before the watchdog acts.
        m.dispatch_at(ReadinessEvent::Refresh, T0 + 61_000).unwrap();
        m.dispatch_at(ReadinessEvent::FetchSuccess(snapshot(T0 + 61_000)), T0 + 61_000)
            .unwrap();

        assert!(m
            .dispatch_at(ReadinessEvent::AgeExceeded, T0 + 61_000)
            .is_err());
        assert!(!m.check_staleness_at(T0 + 61_000));
        let status = m.status_at(T0 + 61_000);
        assert_eq!(status.state, ReadinessState::Ready);
        assert_eq!(status.snapshot.unwrap().fetched_at(), T0 + 61_000);
    }

    #[test]
    fn test_staleness_ignored_while_simulating() {
        let (m, _rx) = machine();
        ready_at(&m, T0);
        m.dispatch_at(ReadinessEvent::StartSimulation, T0).unwrap();
        assert!(!m.check_staleness_at(T0 + 120_000));
        assert_eq!(m.state(), ReadinessState::SimRunning);
    }

    #[test]
    fn test_full_recovery_cycle() {
        let (m, _rx) = machine();
        ready_at(&m, T0);

        m.dispatch_at(ReadinessEvent::ApiDown("proxy unreachable".into()), T0 + 5_000)
            .unwrap();
        assert_eq!(m.state(), ReadinessState::Unstable);
        assert!(!m.can_simulate_at(T0 + 5_000));

        // Stale by the time the API returns.
        let to = m.dispatch_at(ReadinessEvent::ApiUp, T0 + 90_000).unwrap();
        assert_eq!(to, ReadinessState::Fetching);

        m.dispatch_at(ReadinessEvent::FetchSuccess(snapshot(T0 + 91_000)), T0 + 91_000)
            .unwrap();
        assert!(m.can_simulate_at(T0 + 91_500));
        assert_eq!(m.status_at(T0 + 91_500).last_ping, Some(T0 + 91_000));
    }

    #[tokio::test]
    async fn test_watch_channel_notifications() {
        let (m, mut rx) = machine();

        m.dispatch_at(ReadinessEvent::Init, T0).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().state, ReadinessState::Fetching);

        m.dispatch_at(ReadinessEvent::FetchFail("timeout".into()), T0)
            .unwrap();
        rx.changed().await.unwrap();
        let status = rx.borrow_and_update().clone();
        assert_eq!(status.state, ReadinessState::Unstable);
        assert_eq!(status.retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_ready() {
        let (m, _rx) = machine();
        let m = Arc::new(m);

        let waiter = {
            let m = Arc::clone(&m);
            tokio::spawn(async move { m.wait_until_ready().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        ready_at(&m, now_ms());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_config_defaults_from_empty_toml() {
        let config: ReadinessConfig = toml::from_str("").unwrap();
        assert_eq!(config.freshness_ms, 60_000);
        assert!(config.validate().is_ok());
        assert!(ReadinessConfig { freshness_ms: 0 }.validate().is_err());
    }
}
