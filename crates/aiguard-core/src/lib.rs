//! Core domain types for the aiguard trading assistant.
//!
//! This crate provides the types shared by every layer of the system:
//! - `Symbol`: Identifier of a screened asset / trading pair
//! - `OrderSide`: Direction of a simulated position
//! - `Position`: An open simulated position
//! - `PortfolioSnapshot`: Immutable view of the exchange portfolio
//! - `Signal`: Output of the signal-generation service
//! - `CallError`: Failure taxonomy for outbound calls

pub mod call_error;
pub mod error;
pub mod order;
pub mod portfolio;
pub mod position;
pub mod signal;
pub mod symbol;
pub mod time;

pub use call_error::{CallError, ErrorKind};
pub use error::{CoreError, Result};
pub use order::OrderSide;
pub use portfolio::{PortfolioPosition, PortfolioSnapshot};
pub use position::Position;
pub use signal::{Signal, SignalDirection};
pub use symbol::Symbol;
pub use time::now_ms;
