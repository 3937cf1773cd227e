//! Portfolio readiness for aiguard.
//!
//! Decides whether the current portfolio snapshot is fresh enough to run a
//! simulation against:
//! - ReadinessState / ReadinessEvent: the finite-state model
//! - transition: the pure transition function
//! - ReadinessStateMachine: shared owner of the status, broadcast via watch
//! - PortfolioSource: the fetch seam driven by `refresh`

pub mod error;
pub mod machine;
pub mod source;
pub mod state;

pub use error::{ReadinessError, ReadinessResult};
pub use machine::{ReadinessConfig, ReadinessStateMachine};
pub use source::{refresh, PortfolioSource};
pub use state::{transition, ReadinessEvent, ReadinessState, ReadinessStatus};
