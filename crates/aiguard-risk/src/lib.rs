//! AI call health gating for aiguard.
//!
//! Tracks per-symbol signal outcomes and gates the screening pipeline:
//! - CandidateErrorManager: consecutive-error blacklists with a cooldown
//! - Global success rate and Healthy/Degraded/Critical status
//! - ScreeningPolicy: concurrency derived from the health status

pub mod candidate;
pub mod error;
pub mod screening;

pub use candidate::{
    AiHealthSnapshot, AiHealthStatus, CandidateConfig, CandidateErrorManager,
    GlobalAIHealthMetrics, SymbolHealthRecord,
};
pub use error::{RiskError, RiskResult};
pub use screening::ScreeningPolicy;
