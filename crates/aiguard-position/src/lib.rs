//! Open position exit monitoring for aiguard.
//!
//! Re-evaluates simulated positions on a fixed interval:
//! - SignalGenerator: the signal service seam
//! - SimulationStateSource: authoritative simulation state, re-read each tick
//! - PositionExitMonitor: guarded recurring task emitting SELL decisions

pub mod error;
pub mod exit_monitor;
pub mod signal;
pub mod simulation;

pub use error::{PositionError, PositionResult};
pub use exit_monitor::{
    ExitAction, ExitDecision, ExitMonitorConfig, ExitMonitorDeps, ExitReason, PositionExitMonitor,
};
pub use signal::SignalGenerator;
pub use simulation::{JsonFileStateSource, SharedStateSource, SimulationState, SimulationStateSource};
