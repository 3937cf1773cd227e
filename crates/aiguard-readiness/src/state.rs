//! Readiness states, events and the pure transition function.

use std::fmt;
use std::sync::Arc;

use aiguard_core::PortfolioSnapshot;
use serde::{Deserialize, Serialize};

use crate::error::{ReadinessError, ReadinessResult};

/// Whether the system may simulate against the current snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadinessState {
    #[default]
    Idle,
    Fetching,
    Ready,
    SimRunning,
    Unstable,
}

impl ReadinessState {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Ready => "ready",
            Self::SimRunning => "sim_running",
            Self::Unstable => "unstable",
        }
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone)]
pub enum ReadinessEvent {
    Init,
    FetchSuccess(Arc<PortfolioSnapshot>),
    FetchFail(String),
    ApiDown(String),
    AgeExceeded,
    ApiUp,
    StartSimulation,
    StopSimulation,
    /// Re-fetch while keeping the current snapshot.
    Refresh,
}

impl ReadinessEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::FetchSuccess(_) => "FETCH_SUCCESS",
            Self::FetchFail(_) => "FETCH_FAIL",
            Self::ApiDown(_) => "API_DOWN",
            Self::AgeExceeded => "AGE_EXCEEDED",
            Self::ApiUp => "API_UP",
            Self::StartSimulation => "START_SIMULATION",
            Self::StopSimulation => "STOP_SIMULATION",
            Self::Refresh => "REFRESH",
        }
    }
}

/// Authoritative readiness status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadinessStatus {
    pub state: ReadinessState,
    pub reason: Option<String>,
    /// `now - fetched_at` as of the last read, `None` without a snapshot.
    pub snapshot_age_ms: Option<i64>,
    /// Last successful fetch (ms).
    pub last_ping: Option<i64>,
    /// Consecutive failed fetches.
    pub retry_count: u32,
    pub snapshot: Option<Arc<PortfolioSnapshot>>,
}

impl ReadinessStatus {
    /// Snapshot age at `now_ms`.
    pub fn age_at(&self, now_ms: i64) -> Option<i64> {
        self.snapshot.as_ref().map(|s| s.age_ms(now_ms))
    }

    /// Snapshot exists and is no older than `freshness_ms`.
    pub fn is_fresh_at(&self, now_ms: i64, freshness_ms: i64) -> bool {
        self.age_at(now_ms).is_some_and(|age| age <= freshness_ms)
    }
}

/// Apply `event` to `current`.
///
/// Pairs outside the transition table are rejected and `current` is left
/// untouched.
pub fn transition(
    current: &ReadinessStatus,
    event: ReadinessEvent,
    now_ms: i64,
    freshness_ms: i64,
) -> ReadinessResult<ReadinessStatus> {
    use ReadinessEvent as E;
    use ReadinessState as S;

    let mut next = current.clone();
    match (current.state, event) {
        (S::Idle, E::Init) => {
            next.state = S::Fetching;
            next.reason = None;
        }
        (S::Fetching, E::FetchSuccess(snapshot)) => {
            next.state = S::Ready;
            next.reason = None;
            next.retry_count = 0;
            next.last_ping = Some(now_ms);
            next.snapshot = Some(snapshot);
        }
        (S::Fetching, E::FetchFail(reason)) => {
            next.state = S::Unstable;
            next.reason = Some(reason);
            next.retry_count = current.retry_count.saturating_add(1);
        }
        (_, E::ApiDown(reason)) => {
            next.state = S::Unstable;
            next.reason = Some(reason);
        }
        // Staleness is re-judged here; a fetch may have landed since the
        // caller looked.
        (S::Ready, E::AgeExceeded) if !current.is_fresh_at(now_ms, freshness_ms) => {
            next.state = S::Unstable;
            next.reason = Some(format!(
                "snapshot age {}ms exceeds {}ms",
                current.age_at(now_ms).unwrap_or_default(),
                freshness_ms
            ));
        }
        (S::Unstable, E::ApiUp) => {
            next.state = if current.is_fresh_at(now_ms, freshness_ms) {
                S::Ready
            } else {
                S::Fetching
            };
            next.reason = None;
        }
        (S::Ready, E::StartSimulation) => {
            next.state = S::SimRunning;
        }
        (S::SimRunning, E::StopSimulation) => {
            next.state = S::Ready;
        }
        (S::Ready | S::Unstable, E::Refresh) => {
            next.state = S::Fetching;
        }
        (from, event) => {
            return Err(ReadinessError::InvalidTransition {
                from,
                event: event.name(),
            });
        }
    }

    next.snapshot_age_ms = next.age_at(now_ms);
    Ok(next)
}
