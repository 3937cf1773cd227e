//! Screening concurrency derived from AI health.

use serde::{Deserialize, Serialize};

use crate::candidate::AiHealthStatus;

/// How many candidate symbols may be screened in parallel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreeningPolicy {
    /// Concurrency while Healthy.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for ScreeningPolicy {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl ScreeningPolicy {
    /// Healthy → full, Degraded → half (min 1), Critical → 0 (paused).
    pub fn concurrency_for(&self, status: AiHealthStatus) -> usize {
        match status {
            AiHealthStatus::Healthy => self.max_concurrency,
            AiHealthStatus::Degraded => (self.max_concurrency / 2).max(1),
            AiHealthStatus::Critical => 0,
        }
    }

    /// Whether screening should pause entirely.
    pub fn is_paused(&self, status: AiHealthStatus) -> bool {
        self.concurrency_for(status) == 0
    }
}
