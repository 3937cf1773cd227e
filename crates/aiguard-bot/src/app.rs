//! Main application orchestration.
//!
//! Coordinates all components:
//! - Proxy liveness probe feeding network health and readiness
//! - Portfolio refresh with exponential backoff
//! - Snapshot staleness watchdog and simulation start/stop sync
//! - Periodic health summary (UI badge, AI health, screening concurrency)
//! - Position exit monitor and dashboard

use std::sync::Arc;
use std::time::Duration;

use aiguard_core::{CallError, ErrorKind};
use aiguard_dashboard::{run_server, DashboardState};
use aiguard_net::{NetworkHealthTracker, RetryScheduler};
use aiguard_position::{
    ExitAction, ExitDecision, ExitMonitorDeps, JsonFileStateSource, PositionExitMonitor,
    SimulationStateSource,
};
use aiguard_readiness::{
    refresh, PortfolioSource, ReadinessError, ReadinessEvent, ReadinessState,
    ReadinessStateMachine,
};
use aiguard_risk::{CandidateErrorManager, ScreeningPolicy};
use aiguard_telemetry::Metrics;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::adapters::{HttpPortfolioSource, HttpSignalGenerator, ProxyProbe};
use crate::config::AppConfig;
use crate::error::AppResult;

/// Retry key of the portfolio fetch.
pub const PORTFOLIO_RETRY_KEY: &str = "portfolio";

/// Capacity of the exit decision channel.
const EXIT_CHANNEL_CAPACITY: usize = 256;

/// Fetches the portfolio through the readiness machine and re-arms itself
/// with backoff on failure.
pub struct PortfolioRefresher {
    readiness: Arc<ReadinessStateMachine>,
    network: Arc<NetworkHealthTracker>,
    retry: Arc<RetryScheduler>,
    source: Arc<dyn PortfolioSource>,
}

impl PortfolioRefresher {
    pub fn new(
        readiness: Arc<ReadinessStateMachine>,
        network: Arc<NetworkHealthTracker>,
        retry: Arc<RetryScheduler>,
        source: Arc<dyn PortfolioSource>,
    ) -> Self {
        Self {
            readiness,
            network,
            retry,
            source,
        }
    }

    /// One refresh cycle. Boxed so the retry callback can re-enter it.
    pub fn run(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            match refresh(&self.readiness, self.source.as_ref()).await {
                Ok(_) => {
                    self.network.record_success();
                    self.retry.reset(PORTFOLIO_RETRY_KEY);
                }
                Err(ReadinessError::InvalidTransition { from, event }) => {
                    // A simulation holds the snapshot; nothing to do.
                    debug!(from = %from.as_str(), event, "Portfolio refresh skipped");
                }
                Err(ReadinessError::Fetch(e)) => {
                    self.network.record_error(&e);
                    if e.is_retryable() {
                        self.schedule_retry(e.retry_after_secs());
                    } else {
                        warn!(error = %e, "Portfolio fetch failed terminally");
                        self.retry.reset(PORTFOLIO_RETRY_KEY);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Portfolio refresh failed");
                    self.schedule_retry(None);
                }
            }
        })
    }

    fn schedule_retry(self: &Arc<Self>, retry_after_secs: Option<u64>) {
        let next = Arc::clone(self).run();
        let outcome = match retry_after_secs {
            Some(secs) => self
                .retry
                .schedule_rate_limited(PORTFOLIO_RETRY_KEY, secs, next),
            None => self.retry.schedule_retry(PORTFOLIO_RETRY_KEY, next),
        };
        if !outcome.is_scheduled() {
            warn!("Portfolio retries exhausted; waiting for the next refresh");
            self.retry.reset(PORTFOLIO_RETRY_KEY);
        }
    }
}

/// Apply a proxy probe result. Returns true if the caller should refresh
/// the portfolio now.
pub fn apply_probe_result(
    network: &NetworkHealthTracker,
    readiness: &ReadinessStateMachine,
    result: Result<i64, CallError>,
) -> bool {
    match result {
        Ok(server_time) => {
            network.record_success();
            if readiness.state() == ReadinessState::Unstable {
                info!(server_time, "Proxy reachable again");
                if let Err(e) = readiness.dispatch(ReadinessEvent::ApiUp) {
                    debug!(error = %e, "API_UP not applied");
                }
            }
            readiness.state() == ReadinessState::Fetching
        }
        Err(e) => {
            network.record_error(&e);
            if matches!(e.kind(), ErrorKind::Transport | ErrorKind::Timeout) {
                warn!(error = %e, "Proxy probe failed");
                if let Err(err) = readiness.dispatch(ReadinessEvent::ApiDown(e.to_string())) {
                    debug!(error = %err, "API_DOWN not applied");
                }
            } else {
                debug!(error = %e, kind = %e.kind().as_str(), "Proxy probe rejected");
            }
            false
        }
    }
}

/// Mirrors the persisted simulation `isActive` flag into readiness.
///
/// Level-triggered: an active simulation re-enters SIM_RUNNING whenever
/// readiness is back at READY, e.g. after an outage.
pub struct SimulationSync {
    source: Arc<dyn SimulationStateSource>,
    readiness: Arc<ReadinessStateMachine>,
    was_active: bool,
}

impl SimulationSync {
    pub fn new(
        source: Arc<dyn SimulationStateSource>,
        readiness: Arc<ReadinessStateMachine>,
    ) -> Self {
        Self {
            source,
            readiness,
            was_active: false,
        }
    }

    /// Re-read the simulation state and dispatch START/STOP_SIMULATION as
    /// needed. Returns the resulting readiness state.
    pub async fn sync(&mut self) -> ReadinessState {
        let active = match self.source.load().await {
            Ok(state) => state.is_active,
            Err(e) => {
                warn!(error = %e, "Failed to read simulation state");
                return self.readiness.state();
            }
        };
        let started = active && !self.was_active;
        self.was_active = active;

        match (active, self.readiness.state()) {
            (true, ReadinessState::Ready) => {
                if let Err(e) = self.readiness.dispatch(ReadinessEvent::StartSimulation) {
                    debug!(error = %e, "START_SIMULATION not applied");
                }
            }
            (true, ReadinessState::SimRunning) => {}
            (true, state) => {
                if started {
                    warn!(
                        readiness = %state.as_str(),
                        "Simulation active but portfolio not ready"
                    );
                }
            }
            (false, ReadinessState::SimRunning) => {
                if let Err(e) = self.readiness.dispatch(ReadinessEvent::StopSimulation) {
                    debug!(error = %e, "STOP_SIMULATION not applied");
                }
            }
            (false, _) => {}
        }
        self.readiness.state()
    }
}

/// Main application.
pub struct Application {
    config: AppConfig,
    network: Arc<NetworkHealthTracker>,
    candidates: Arc<CandidateErrorManager>,
    readiness: Arc<ReadinessStateMachine>,
    retry: Arc<RetryScheduler>,
    screening: ScreeningPolicy,
    probe: ProxyProbe,
    refresher: Arc<PortfolioRefresher>,
    simulation: SimulationSync,
    exit_monitor: PositionExitMonitor,
    exit_rx: mpsc::Receiver<ExitDecision>,
}

impl Application {
    /// Create a new application.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        let network = Arc::new(NetworkHealthTracker::new(config.network.clone()));
        let candidates = Arc::new(CandidateErrorManager::new(config.candidate.clone()));
        let (readiness, _status_rx) = ReadinessStateMachine::new(config.readiness.clone());
        let readiness = Arc::new(readiness);
        let retry = Arc::new(RetryScheduler::new(config.retry.clone()));

        let probe = ProxyProbe::from_config(&config.endpoints)?;
        let portfolio: Arc<dyn PortfolioSource> =
            Arc::new(HttpPortfolioSource::from_config(&config.endpoints)?);
        let refresher = Arc::new(PortfolioRefresher::new(
            Arc::clone(&readiness),
            Arc::clone(&network),
            Arc::clone(&retry),
            portfolio,
        ));

        let state_source: Arc<dyn SimulationStateSource> =
            Arc::new(JsonFileStateSource::new(&config.simulation.state_path));
        let simulation = SimulationSync::new(Arc::clone(&state_source), Arc::clone(&readiness));

        let (exit_tx, exit_rx) = mpsc::channel(EXIT_CHANNEL_CAPACITY);
        let deps = ExitMonitorDeps {
            state: state_source,
            signals: Arc::new(HttpSignalGenerator::from_config(&config.endpoints)?),
            network: Arc::clone(&network),
            candidates: Arc::clone(&candidates),
            readiness: Arc::clone(&readiness),
            retry: Arc::clone(&retry),
        };
        let exit_monitor = PositionExitMonitor::new(config.exit_monitor.clone(), deps, exit_tx);

        Ok(Self {
            screening: config.screening.clone(),
            config,
            network,
            candidates,
            readiness,
            retry,
            probe,
            refresher,
            simulation,
            exit_monitor,
            exit_rx,
        })
    }

    /// Run until Ctrl+C.
    pub async fn run(mut self) -> AppResult<()> {
        info!("Starting application");

        let dashboard_handle = if self.config.dashboard.enabled {
            let state = DashboardState::new(
                Arc::clone(&self.network),
                Arc::clone(&self.candidates),
                Arc::clone(&self.readiness),
            );
            let dashboard_config = self.config.dashboard.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = run_server(state, dashboard_config).await {
                    error!(error = %e, "Dashboard server failed");
                }
            }))
        } else {
            None
        };

        self.exit_monitor.start();
        Arc::clone(&self.refresher).run().await;

        let loops = &self.config.loops;
        let mut probe_interval = ticker(loops.proxy_probe_interval_ms);
        let mut refresh_interval = ticker(loops.portfolio_refresh_interval_ms);
        let mut staleness_interval = ticker(loops.staleness_check_interval_ms);
        let mut health_interval = ticker(loops.health_refresh_interval_ms);

        info!("Entering main loop");

        loop {
            tokio::select! {
                _ = probe_interval.tick() => {
                    let result = self.probe.probe().await;
                    if apply_probe_result(&self.network, &self.readiness, result) {
                        Arc::clone(&self.refresher).run().await;
                    }
                }
                _ = refresh_interval.tick() => {
                    if !self.retry.is_pending(PORTFOLIO_RETRY_KEY) {
                        Arc::clone(&self.refresher).run().await;
                    }
                }
                _ = staleness_interval.tick() => {
                    if self.readiness.check_staleness() {
                        info!("Portfolio snapshot went stale");
                    }
                    self.simulation.sync().await;
                }
                _ = health_interval.tick() => {
                    self.log_health();
                }
                Some(decision) = self.exit_rx.recv() => {
                    Self::handle_exit_decision(&decision);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        self.exit_monitor.stop();
        self.retry.cancel_all();
        if let Some(handle) = dashboard_handle {
            handle.abort();
        }

        info!("Application stopped");
        Ok(())
    }

    fn log_health(&self) {
        let badge = self.network.derive_badge();
        Metrics::network_badge(badge.as_str());

        let ai = self.candidates.health_snapshot();
        let status = self.readiness.status();
        info!(
            badge = %badge.as_str(),
            success_rate = ai.success_rate,
            ai_status = ?ai.status,
            active_blacklists = ai.active_blacklists,
            readiness = %status.state.as_str(),
            snapshot_age_ms = ?status.snapshot_age_ms,
            screening_concurrency = self.screening.concurrency_for(ai.status),
            "Health summary"
        );
        if self.screening.is_paused(ai.status) {
            warn!(success_rate = ai.success_rate, "AI health critical, screening paused");
        }
    }

    fn handle_exit_decision(decision: &ExitDecision) {
        match decision.action {
            ExitAction::Sell => info!(
                position_id = %decision.position_id,
                asset_pair = %decision.asset_pair,
                reason = ?decision.reason,
                confidence = ?decision.confidence,
                "Exit signal: SELL"
            ),
            ExitAction::Hold => debug!(
                position_id = %decision.position_id,
                "Exit decision: HOLD"
            ),
        }
    }
}

fn ticker(period_ms: u64) -> tokio::time::Interval {
    let period = Duration::from_millis(period_ms);
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
