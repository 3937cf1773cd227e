//! Position exit monitor.
//!
//! Periodically asks the signal service whether each open simulated position
//! should be closed.
//!
//! ```text
//! interval tick
//!   → tick guard (skip if a tick or retry is in flight)
//!   → re-read SimulationState (skip unless active, unpaused, non-empty)
//!   → gate (skip unless readiness is READY/SIM_RUNNING with a snapshot,
//!     or while the API is rate limited)
//!   → per position: blacklisted → HOLD, else generate_detailed_signal
//!        opposite direction → SELL → exit_tx.try_send()
//!        failure → HOLD + retry "exit:{id}" via RetryScheduler
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aiguard_core::{now_ms, CallError, Position, Signal, SignalDirection, Symbol};
use aiguard_net::{NetworkHealthTracker, RetryOutcome, RetryScheduler};
use aiguard_readiness::{ReadinessState, ReadinessStateMachine};
use aiguard_risk::CandidateErrorManager;
use aiguard_telemetry::Metrics;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PositionError, PositionResult};
use crate::signal::SignalGenerator;
use crate::simulation::SimulationStateSource;

/// Retry keys for per-position re-evaluation share this prefix.
pub const EXIT_RETRY_PREFIX: &str = "exit:";

// ============================================================================
// Config
// ============================================================================

/// Configuration for the exit monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitMonitorConfig {
    /// Whether the monitor runs at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Evaluation interval (ms). Default: 5 minutes.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_interval_ms() -> u64 {
    5 * 60 * 1000
}

impl Default for ExitMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl ExitMonitorConfig {
    pub fn validate(&self) -> PositionResult<()> {
        if self.interval_ms == 0 {
            return Err(PositionError::ConfigError(
                "interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Decisions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExitAction {
    Sell,
    Hold,
}

impl ExitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sell => "sell",
            Self::Hold => "hold",
        }
    }
}

impl fmt::Display for ExitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Signal points against the position.
    OpposingSignal,
    NoSignal,
    SameDirection,
    HoldSignal,
    Blacklisted,
    CallFailed,
}

/// Exit decision for one position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitDecision {
    pub position_id: String,
    pub asset_pair: String,
    pub action: ExitAction,
    pub reason: ExitReason,
    /// Confidence of the signal behind the decision, if any.
    pub confidence: Option<f64>,
    pub decided_at: i64,
}

impl ExitDecision {
    fn new(position: &Position, action: ExitAction, reason: ExitReason) -> Self {
        Self {
            position_id: position.id.clone(),
            asset_pair: position.asset_pair.clone(),
            action,
            reason,
            confidence: None,
            decided_at: now_ms(),
        }
    }

    fn hold(position: &Position, reason: ExitReason) -> Self {
        Self::new(position, ExitAction::Hold, reason)
    }

    /// SELL iff the signal opposes the position direction.
    fn from_signal(position: &Position, signal: Option<&Signal>) -> Self {
        let Some(signal) = signal else {
            return Self::hold(position, ExitReason::NoSignal);
        };
        let (action, reason) = match signal.direction {
            SignalDirection::Hold => (ExitAction::Hold, ExitReason::HoldSignal),
            d if d.opposes(position.direction) => (ExitAction::Sell, ExitReason::OpposingSignal),
            _ => (ExitAction::Hold, ExitReason::SameDirection),
        };
        let mut decision = Self::new(position, action, reason);
        decision.confidence = Some(signal.confidence);
        decision
    }
}

// ============================================================================
// PositionExitMonitor
// ============================================================================

/// Shared services the monitor reads from and records into.
#[derive(Clone)]
pub struct ExitMonitorDeps {
    pub state: Arc<dyn SimulationStateSource>,
    pub signals: Arc<dyn SignalGenerator>,
    pub network: Arc<NetworkHealthTracker>,
    pub candidates: Arc<CandidateErrorManager>,
    pub readiness: Arc<ReadinessStateMachine>,
    pub retry: Arc<RetryScheduler>,
}

struct Runner {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    config: ExitMonitorConfig,
    deps: ExitMonitorDeps,
    exit_tx: mpsc::Sender<ExitDecision>,
    /// Held for the duration of a tick or retry evaluation.
    busy: tokio::sync::Mutex<()>,
    halted: AtomicBool,
}

/// Recurring, guarded exit evaluation for open simulated positions.
///
/// At most one loop runs per monitor and evaluations never overlap.
pub struct PositionExitMonitor {
    inner: Arc<Inner>,
    runner: Mutex<Option<Runner>>,
}

impl PositionExitMonitor {
    /// Create a stopped monitor.
    #[must_use]
    pub fn new(
        config: ExitMonitorConfig,
        deps: ExitMonitorDeps,
        exit_tx: mpsc::Sender<ExitDecision>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                deps,
                exit_tx,
                busy: tokio::sync::Mutex::new(()),
                halted: AtomicBool::new(false),
            }),
            runner: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ExitMonitorConfig {
        &self.inner.config
    }

    /// Start the loop, stopping any loop already running.
    ///
    /// The first evaluation happens one interval after start.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) {
        if !self.inner.config.enabled {
            info!("PositionExitMonitor disabled");
            return;
        }

        let mut runner = self.runner.lock();
        if let Some(previous) = runner.take() {
            Self::shutdown(&self.inner, previous);
        }
        self.inner.halted.store(false, Ordering::SeqCst);

        let token = CancellationToken::new();
        let period = Duration::from_millis(self.inner.config.interval_ms);
        let inner = Arc::clone(&self.inner);
        let loop_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = loop_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    () = loop_token.cancelled() => break,
                    _ = inner.tick() => {}
                }
            }
            debug!("PositionExitMonitor loop exited");
        });

        info!(
            interval_ms = self.inner.config.interval_ms,
            "PositionExitMonitor started"
        );
        *runner = Some(Runner { token, handle });
    }

    /// Stop the loop and cancel pending per-position retries. Idempotent.
    pub fn stop(&self) {
        if let Some(runner) = self.runner.lock().take() {
            Self::shutdown(&self.inner, runner);
            info!("PositionExitMonitor stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.runner.lock().is_some()
    }

    /// Run one evaluation pass now.
    pub async fn tick(&self) -> Vec<ExitDecision> {
        self.inner.tick().await
    }

    fn shutdown(inner: &Inner, runner: Runner) {
        inner.halted.store(true, Ordering::SeqCst);
        runner.token.cancel();
        runner.handle.abort();
        let cancelled = inner.deps.retry.cancel_prefix(EXIT_RETRY_PREFIX);
        if cancelled > 0 {
            debug!(cancelled, "Pending exit retries cancelled");
        }
    }
}

impl Drop for PositionExitMonitor {
    fn drop(&mut self) {
        if let Some(runner) = self.runner.get_mut().take() {
            Self::shutdown(&self.inner, runner);
        }
    }
}

impl Inner {
    async fn tick(self: &Arc<Self>) -> Vec<ExitDecision> {
        let Ok(_busy) = self.busy.try_lock() else {
            debug!("Exit tick skipped: previous evaluation still running");
            Metrics::exit_tick("overlap");
            return Vec::new();
        };

        let state = match self.deps.state.load().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Exit tick skipped: simulation state unreadable");
                Metrics::exit_tick("state_error");
                return Vec::new();
            }
        };

        if !state.is_active {
            Metrics::exit_tick("inactive");
            return Vec::new();
        }
        if state.is_paused {
            Metrics::exit_tick("paused");
            return Vec::new();
        }
        if state.open_positions.is_empty() {
            Metrics::exit_tick("no_positions");
            return Vec::new();
        }
        if let Some(reason) = self.gate_reason() {
            info!(reason, "Exit tick skipped");
            Metrics::exit_tick("gated");
            return Vec::new();
        }

        let mut decisions = Vec::with_capacity(state.open_positions.len());
        for position in &state.open_positions {
            let decision = self.evaluate(position).await;
            self.emit(&decision);
            decisions.push(decision);
        }

        let sells = decisions
            .iter()
            .filter(|d| d.action == ExitAction::Sell)
            .count();
        debug!(positions = decisions.len(), sells, "Exit tick evaluated");
        Metrics::exit_tick("evaluated");
        decisions
    }

    /// Readiness is the gate: only READY or SIM_RUNNING with a snapshot.
    fn gate_reason(&self) -> Option<&'static str> {
        let readiness = self.deps.readiness.status();
        match readiness.state {
            ReadinessState::Ready | ReadinessState::SimRunning if readiness.snapshot.is_some() => {}
            ReadinessState::Unstable => return Some("readiness unstable"),
            _ => return Some("portfolio not ready"),
        }
        if self.deps.network.is_rate_limited() {
            return Some("rate limited");
        }
        None
    }

    async fn evaluate(self: &Arc<Self>, position: &Position) -> ExitDecision {
        let symbol = Symbol::new(&position.asset_pair);
        if self.deps.candidates.is_blacklisted(&symbol) {
            debug!(position_id = %position.id, %symbol, "Blacklisted, holding");
            return ExitDecision::hold(position, ExitReason::Blacklisted);
        }

        match self
            .deps
            .signals
            .generate_detailed_signal(&position.asset_pair)
            .await
        {
            Ok(signal) => {
                self.deps.network.record_success();
                self.deps.candidates.record_success(&symbol);
                if signal.as_ref().is_some_and(|s| s.fallback_used) {
                    self.deps.candidates.record_fallback(&symbol);
                }
                self.deps.retry.reset(&retry_key(&position.id));
                ExitDecision::from_signal(position, signal.as_ref())
            }
            Err(e) => {
                warn!(
                    position_id = %position.id,
                    %symbol,
                    kind = %e.kind(),
                    error = %e,
                    "Exit signal call failed"
                );
                self.deps.network.record_error(&e);
                self.deps.candidates.record_error(&symbol, e.kind());
                if e.is_retryable() {
                    self.schedule_retry(&position.id, &e);
                }
                ExitDecision::hold(position, ExitReason::CallFailed)
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, position_id: &str, error: &CallError) {
        let key = retry_key(position_id);
        let callback = Arc::clone(self).retry_position(position_id.to_string());
        let outcome = match error.retry_after_secs() {
            Some(secs) => self
                .deps
                .retry
                .schedule_rate_limited(key.clone(), secs, callback),
            None => self.deps.retry.schedule_retry(key.clone(), callback),
        };
        match outcome {
            RetryOutcome::Scheduled { attempt, delay } => {
                debug!(
                    position_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Exit re-evaluation scheduled"
                );
            }
            RetryOutcome::Terminal { attempts } => {
                warn!(
                    position_id,
                    attempts, "Exit re-evaluation abandoned until next tick"
                );
                self.deps.retry.reset(&key);
            }
        }
    }

    /// Re-evaluate one position after a failed call.
    ///
    /// Re-reads the simulation state; the position may have been closed or
    /// the simulation paused since the failure.
    fn retry_position(self: Arc<Self>, position_id: String) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if self.halted.load(Ordering::SeqCst) {
                return;
            }
            let Ok(_busy) = self.busy.try_lock() else {
                debug!(%position_id, "Exit retry skipped: evaluation in progress");
                return;
            };

            let state = match self.deps.state.load().await {
                Ok(state) => state,
                Err(e) => {
                    warn!(%position_id, error = %e, "Exit retry: simulation state unreadable");
                    return;
                }
            };
            let position = match state.position(&position_id) {
                Some(p) if state.has_work() => p.clone(),
                _ => {
                    debug!(%position_id, "Exit retry dropped: position no longer evaluable");
                    self.deps.retry.reset(&retry_key(&position_id));
                    return;
                }
            };
            if let Some(reason) = self.gate_reason() {
                debug!(%position_id, reason, "Exit retry gated, rescheduling");
                self.schedule_retry(&position_id, &CallError::Other(reason.to_string()));
                return;
            }

            let decision = self.evaluate(&position).await;
            self.emit(&decision);
        })
    }

    fn emit(&self, decision: &ExitDecision) {
        Metrics::exit_decision(decision.action.as_str());
        if decision.action != ExitAction::Sell {
            return;
        }

        info!(
            position_id = %decision.position_id,
            asset_pair = %decision.asset_pair,
            confidence = decision.confidence.unwrap_or_default(),
            "Exit SELL decided"
        );
        match self.exit_tx.try_send(decision.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    position_id = %decision.position_id,
                    "Exit channel full, next tick will re-decide"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Exit channel closed");
            }
        }
    }
}

fn retry_key(position_id: &str) -> String {
    format!("{EXIT_RETRY_PREFIX}{position_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::MockSignalGenerator;
    use crate::simulation::{SharedStateSource, SimulationState};
    use aiguard_core::{OrderSide, PortfolioSnapshot};
    use aiguard_net::{NetworkHealthConfig, RetryConfig};
    use aiguard_readiness::{ReadinessConfig, ReadinessEvent};
    use aiguard_risk::CandidateConfig;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    type Reply = Result<Option<Signal>, CallError>;

    /// Replays queued replies, then answers `Ok(None)`.
    #[derive(Default)]
    struct ScriptedSignals {
        replies: Mutex<VecDeque<Reply>>,
        calls: AtomicUsize,
    }

    impl ScriptedSignals {
        fn with(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SignalGenerator for ScriptedSignals {
        async fn generate_detailed_signal(&self, _asset_pair: &str) -> Reply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies.lock().pop_front().unwrap_or(Ok(None))
        }
    }

    struct Harness {
        monitor: PositionExitMonitor,
        exits: mpsc::Receiver<ExitDecision>,
        state: SharedStateSource,
        deps: ExitMonitorDeps,
    }

    fn position(id: &str, pair: &str, direction: OrderSide) -> Position {
        Position {
            id: id.to_string(),
            asset_pair: pair.to_string(),
            direction,
            entry_price: dec!(42000),
            quantity: dec!(0.1),
            take_profit: None,
            stop_loss: None,
            unrealized_pnl: dec!(0),
            opened_at: 1_700_000_000_000,
        }
    }

    fn active(positions: Vec<Position>) -> SimulationState {
        SimulationState {
            is_active: true,
            is_paused: false,
            open_positions: positions,
        }
    }

    fn harness(signals: Arc<dyn SignalGenerator>, state: SimulationState) -> Harness {
        let h = idle_harness(signals, state);
        h.deps.readiness.dispatch(ReadinessEvent::Init).unwrap();
        h.deps
            .readiness
            .dispatch(ReadinessEvent::FetchSuccess(Arc::new(
                PortfolioSnapshot::from_positions(Vec::new(), dec!(1000), now_ms()),
            )))
            .unwrap();
        h
    }

    /// Readiness left in IDLE, no snapshot fetched.
    fn idle_harness(signals: Arc<dyn SignalGenerator>, state: SimulationState) -> Harness {
        let source = SharedStateSource::new(state);
        let deps = ExitMonitorDeps {
            state: Arc::new(source.clone()),
            signals,
            network: Arc::new(NetworkHealthTracker::new(NetworkHealthConfig::default())),
            candidates: Arc::new(CandidateErrorManager::new(CandidateConfig::default())),
            readiness: Arc::new(ReadinessStateMachine::new(ReadinessConfig::default()).0),
            retry: Arc::new(RetryScheduler::new(RetryConfig::default())),
        };
        let (tx, rx) = mpsc::channel(16);
        Harness {
            monitor: PositionExitMonitor::new(ExitMonitorConfig::default(), deps.clone(), tx),
            exits: rx,
            state: source,
            deps,
        }
    }

    #[tokio::test]
    async fn test_inactive_simulation_makes_no_calls() {
        let mut signals = MockSignalGenerator::new();
        signals.expect_generate_detailed_signal().times(0);

        let mut state = active(vec![position("p1", "BTC/USD", OrderSide::Buy)]);
        state.is_active = false;
        let h = harness(Arc::new(signals), state);
        assert!(h.monitor.tick().await.is_empty());

        h.state.update(|s| {
            s.is_active = true;
            s.is_paused = true;
        });
        assert!(h.monitor.tick().await.is_empty());

        h.state.set(active(Vec::new()));
        assert!(h.monitor.tick().await.is_empty());
    }

    #[tokio::test]
    async fn test_opposing_signal_sells() {
        let mut signals = MockSignalGenerator::new();
        signals
            .expect_generate_detailed_signal()
            .times(1)
            .returning(|pair| Ok(Some(Signal::new(pair, SignalDirection::Sell, 0.82))));

        let mut h = harness(
            Arc::new(signals),
            active(vec![position("p1", "BTC/USD", OrderSide::Buy)]),
        );
        let decisions = h.monitor.tick().await;
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action, ExitAction::Sell);
        assert_eq!(decisions[0].reason, ExitReason::OpposingSignal);
        assert_eq!(decisions[0].confidence, Some(0.82));
        assert_eq!(decisions[0].asset_pair, "BTC/USD");

        let sent = tokio_test::assert_ok!(h.exits.try_recv());
        assert_eq!(sent.position_id, "p1");
        assert!(h.deps.network.status().last_error.is_none());
    }

    #[tokio::test]
    async fn test_non_opposing_outcomes_hold() {
        let signals = ScriptedSignals::with(vec![
            Ok(Some(Signal::new("ETH/USD", SignalDirection::Buy, 0.7))),
            Ok(Some(Signal::new("SOL/USD", SignalDirection::Hold, 0.5))),
            Ok(None),
        ]);
        let mut h = harness(
            signals,
            active(vec![
                position("p1", "ETH/USD", OrderSide::Buy),
                position("p2", "SOL/USD", OrderSide::Sell),
                position("p3", "ADA/USD", OrderSide::Buy),
            ]),
        );

        let decisions = h.monitor.tick().await;
        let reasons: Vec<_> = decisions.iter().map(|d| d.reason).collect();
        assert_eq!(
            reasons,
            vec![
                ExitReason::SameDirection,
                ExitReason::HoldSignal,
                ExitReason::NoSignal
            ]
        );
        assert!(decisions.iter().all(|d| d.action == ExitAction::Hold));
        assert!(h.exits.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_holds_and_records() {
        let signals = ScriptedSignals::with(vec![Err(CallError::Parse("bad json".into()))]);
        let h = harness(
            signals,
            active(vec![position("p1", "DOGE/USD", OrderSide::Buy)]),
        );

        let decisions = h.monitor.tick().await;
        assert_eq!(decisions[0].action, ExitAction::Hold);
        assert_eq!(decisions[0].reason, ExitReason::CallFailed);

        assert!(h.deps.network.status().last_error.is_some());
        assert_eq!(h.deps.candidates.health_metrics().total_errors, 1);
        assert!(h.deps.retry.is_pending("exit:p1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_reevaluates_and_sells() {
        let signals = ScriptedSignals::with(vec![
            Err(CallError::Timeout(10_000)),
            Ok(Some(Signal::new("BTC/USD", SignalDirection::Buy, 0.9))),
        ]);
        let mut h = harness(
            signals.clone(),
            active(vec![position("p1", "BTC/USD", OrderSide::Sell)]),
        );

        h.monitor.tick().await;
        assert_eq!(signals.calls(), 1);

        // First backoff step is 2s.
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(signals.calls(), 2);

        let sent = h.exits.try_recv().unwrap();
        assert_eq!(sent.action, ExitAction::Sell);
        assert!(!h.deps.retry.is_pending("exit:p1"));
        assert_eq!(h.deps.retry.attempts("exit:p1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_drops_closed_position() {
        let signals = ScriptedSignals::with(vec![Err(CallError::Timeout(10_000))]);
        let h = harness(
            signals.clone(),
            active(vec![position("p1", "BTC/USD", OrderSide::Buy)]),
        );

        h.monitor.tick().await;
        h.state.set(active(vec![position("p2", "ETH/USD", OrderSide::Buy)]));

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(signals.calls(), 1);
        assert!(h.deps.retry.task("exit:p1").is_none());
    }

    #[tokio::test]
    async fn test_auth_failure_not_retried() {
        let signals = ScriptedSignals::with(vec![Err(CallError::Auth("401".into()))]);
        let h = harness(
            signals,
            active(vec![position("p1", "BTC/USD", OrderSide::Buy)]),
        );
        h.monitor.tick().await;
        assert!(!h.deps.retry.is_pending("exit:p1"));
    }

    #[tokio::test]
    async fn test_blacklisted_pair_holds_without_call() {
        let mut signals = MockSignalGenerator::new();
        signals.expect_generate_detailed_signal().times(0);
        let h = harness(
            Arc::new(signals),
            active(vec![position("p1", "DOGE/USD", OrderSide::Buy)]),
        );
        let symbol = Symbol::new("DOGE/USD");
        for _ in 0..5 {
            h.deps
                .candidates
                .record_error(&symbol, aiguard_core::ErrorKind::Parse);
        }

        let decisions = h.monitor.tick().await;
        assert_eq!(decisions[0].reason, ExitReason::Blacklisted);
    }

    #[tokio::test]
    async fn test_gated_while_unstable_or_rate_limited() {
        let mut signals = MockSignalGenerator::new();
        signals.expect_generate_detailed_signal().times(0);
        let h = harness(
            Arc::new(signals),
            active(vec![position("p1", "BTC/USD", OrderSide::Buy)]),
        );

        h.deps
            .readiness
            .dispatch(ReadinessEvent::ApiDown("proxy".into()))
            .unwrap();
        assert!(h.monitor.tick().await.is_empty());

        h.deps.readiness.dispatch(ReadinessEvent::ApiUp).unwrap();
        h.deps.network.record_error(&CallError::RateLimited {
            retry_after_secs: 60,
        });
        assert!(h.monitor.tick().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_calls_before_portfolio_ready() {
        let signals = ScriptedSignals::with(Vec::new());
        let h = idle_harness(
            signals.clone(),
            active(vec![position("p1", "BTC/USD", OrderSide::Buy)]),
        );

        assert!(h.monitor.tick().await.is_empty());
        h.deps.readiness.dispatch(ReadinessEvent::Init).unwrap();
        assert_eq!(h.deps.readiness.state(), ReadinessState::Fetching);
        assert!(h.monitor.tick().await.is_empty());
        assert_eq!(signals.calls(), 0);

        h.deps
            .readiness
            .dispatch(ReadinessEvent::FetchSuccess(Arc::new(
                PortfolioSnapshot::from_positions(Vec::new(), dec!(1000), now_ms()),
            )))
            .unwrap();
        h.deps
            .readiness
            .dispatch(ReadinessEvent::StartSimulation)
            .unwrap();
        assert_eq!(h.monitor.tick().await.len(), 1);
        assert_eq!(signals.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_first_tick_after_one_interval() {
        let signals = ScriptedSignals::with(Vec::new());
        let h = harness(
            signals.clone(),
            active(vec![position("p1", "BTC/USD", OrderSide::Buy)]),
        );

        h.monitor.start();
        tokio::time::sleep(Duration::from_millis(299_000)).await;
        assert_eq!(signals.calls(), 0);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(signals.calls(), 1);

        tokio::time::sleep(Duration::from_millis(300_000)).await;
        assert_eq!(signals.calls(), 2);
        h.monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_runs_one_loop() {
        let signals = ScriptedSignals::with(Vec::new());
        let h = harness(
            signals.clone(),
            active(vec![position("p1", "BTC/USD", OrderSide::Buy)]),
        );

        h.monitor.start();
        h.monitor.start();
        assert!(h.monitor.is_running());

        tokio::time::sleep(Duration::from_millis(301_000)).await;
        assert_eq!(signals.calls(), 1);
        h.monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_cancels_retries() {
        let signals = ScriptedSignals::with(vec![Err(CallError::Timeout(10_000))]);
        let h = harness(
            signals.clone(),
            active(vec![position("p1", "BTC/USD", OrderSide::Buy)]),
        );

        h.monitor.start();
        tokio::time::sleep(Duration::from_millis(300_500)).await;
        assert_eq!(signals.calls(), 1);
        assert!(h.deps.retry.is_pending("exit:p1"));

        h.monitor.stop();
        h.monitor.stop();
        assert!(!h.monitor.is_running());
        assert!(!h.deps.retry.is_pending("exit:p1"));

        tokio::time::sleep(Duration::from_millis(900_000)).await;
        assert_eq!(signals.calls(), 1);
    }

    #[tokio::test]
    async fn test_disabled_monitor_never_starts() {
        let signals = ScriptedSignals::with(Vec::new());
        let source = SharedStateSource::default();
        let deps = ExitMonitorDeps {
            state: Arc::new(source),
            signals,
            network: Arc::new(NetworkHealthTracker::new(NetworkHealthConfig::default())),
            candidates: Arc::new(CandidateErrorManager::new(CandidateConfig::default())),
            readiness: Arc::new(ReadinessStateMachine::new(ReadinessConfig::default()).0),
            retry: Arc::new(RetryScheduler::new(RetryConfig::default())),
        };
        let (tx, _rx) = mpsc::channel(1);
        let config = ExitMonitorConfig {
            enabled: false,
            ..Default::default()
        };
        let monitor = PositionExitMonitor::new(config, deps, tx);
        monitor.start();
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_config_defaults() {
        let config: ExitMonitorConfig = toml::from_str("").unwrap();
        assert_eq!(config.interval_ms, 300_000);
        assert!(config.enabled);
        assert!(config.validate().is_ok());
    }
}
