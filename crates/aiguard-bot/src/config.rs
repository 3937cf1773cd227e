//! Application configuration.

use std::path::Path;

use aiguard_dashboard::DashboardConfig;
use aiguard_net::{NetworkHealthConfig, RetryConfig};
use aiguard_position::ExitMonitorConfig;
use aiguard_readiness::ReadinessConfig;
use aiguard_risk::{CandidateConfig, ScreeningPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Upstream endpoints (signal service and exchange proxy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointsConfig {
    /// Detailed signal endpoint (POST).
    #[serde(default = "default_signal_url")]
    pub signal_url: String,
    /// Proxy timestamp endpoint used as a liveness probe (GET).
    #[serde(default = "default_proxy_time_url")]
    pub proxy_time_url: String,
    /// Portfolio endpoint (GET).
    #[serde(default = "default_portfolio_url")]
    pub portfolio_url: String,
    /// Per-request timeout (ms).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_signal_url() -> String {
    "http://127.0.0.1:3001/api/signal".to_string()
}

fn default_proxy_time_url() -> String {
    "http://127.0.0.1:3001/api/time".to_string()
}

fn default_portfolio_url() -> String {
    "http://127.0.0.1:3001/api/portfolio".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            signal_url: default_signal_url(),
            proxy_time_url: default_proxy_time_url(),
            portfolio_url: default_portfolio_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Periods of the host's background loops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopsConfig {
    /// Proxy liveness probe (ms).
    #[serde(default = "default_proxy_probe_interval_ms")]
    pub proxy_probe_interval_ms: u64,
    /// Portfolio refresh (ms).
    #[serde(default = "default_portfolio_refresh_interval_ms")]
    pub portfolio_refresh_interval_ms: u64,
    /// Snapshot staleness watchdog (ms).
    #[serde(default = "default_staleness_check_interval_ms")]
    pub staleness_check_interval_ms: u64,
    /// Health summary refresh, matching the UI poll (ms).
    #[serde(default = "default_health_refresh_interval_ms")]
    pub health_refresh_interval_ms: u64,
}

fn default_proxy_probe_interval_ms() -> u64 {
    15_000
}

fn default_portfolio_refresh_interval_ms() -> u64 {
    30_000
}

fn default_staleness_check_interval_ms() -> u64 {
    5_000
}

fn default_health_refresh_interval_ms() -> u64 {
    30_000
}

impl Default for LoopsConfig {
    fn default() -> Self {
        Self {
            proxy_probe_interval_ms: default_proxy_probe_interval_ms(),
            portfolio_refresh_interval_ms: default_portfolio_refresh_interval_ms(),
            staleness_check_interval_ms: default_staleness_check_interval_ms(),
            health_refresh_interval_ms: default_health_refresh_interval_ms(),
        }
    }
}

/// Where the simulation subsystem persists its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

fn default_state_path() -> String {
    "data/simulation_state.json".to_string()
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub loops: LoopsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub network: NetworkHealthConfig,
    #[serde(default)]
    pub candidate: CandidateConfig,
    #[serde(default)]
    pub screening: ScreeningPolicy,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub exit_monitor: ExitMonitorConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

impl AppConfig {
    /// Load from `path`, falling back to defaults if the file does not exist.
    pub fn load(path: &str) -> AppResult<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> AppResult<()> {
        self.retry.validate()?;
        self.network.validate()?;
        self.candidate.validate()?;
        self.readiness.validate()?;
        self.exit_monitor.validate()?;

        let loops = &self.loops;
        if [
            loops.proxy_probe_interval_ms,
            loops.portfolio_refresh_interval_ms,
            loops.staleness_check_interval_ms,
            loops.health_refresh_interval_ms,
            self.endpoints.timeout_ms,
        ]
        .contains(&0)
        {
            return Err(AppError::Config(
                "loop intervals and timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
