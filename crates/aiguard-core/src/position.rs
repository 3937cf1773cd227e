//! Simulated position, as persisted by the simulation subsystem.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::order::OrderSide;

/// An open simulated position.
///
/// Owned by the simulation subsystem. The resilience layer only reads
/// positions and emits exit decisions; it never mutates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Opaque position identifier.
    pub id: String,
    /// Asset pair (e.g. `"BTC/USD"`).
    pub asset_pair: String,
    /// Direction of the position.
    pub direction: OrderSide,
    /// Entry price.
    pub entry_price: Decimal,
    /// Quantity held.
    pub quantity: Decimal,
    /// Take-profit price, if set.
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    /// Stop-loss price, if set.
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    /// Unrealized P&L in quote currency.
    #[serde(default)]
    pub unrealized_pnl: Decimal,
    /// Open timestamp (Unix milliseconds).
    pub opened_at: i64,
}

impl Position {
    /// Holding time in milliseconds at `now_ms`.
    #[must_use]
    pub fn held_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.opened_at).max(0)
    }
}
