//! Portfolio snapshot.
//!
//! A snapshot is immutable once created. A new fetch produces a new
//! snapshot; holders share it through `Arc<PortfolioSnapshot>`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Balance of a single currency in the portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioPosition {
    /// Currency code (e.g. `"BTC"`).
    pub currency: String,
    /// Total balance.
    pub balance: Decimal,
    /// Balance available for trading (not locked in orders).
    pub available: Decimal,
    /// Value of the balance in USD.
    pub usd_value: Decimal,
}

/// Immutable view of the exchange portfolio at `fetched_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    /// Positions in exchange order.
    positions: Vec<PortfolioPosition>,
    /// Total portfolio value in USD.
    total_usd_value: Decimal,
    /// Cash (quote currency) balance.
    cash_balance: Decimal,
    /// Fetch timestamp (Unix milliseconds).
    fetched_at: i64,
}

impl PortfolioSnapshot {
    /// Create a snapshot. The total is taken as reported by the exchange.
    #[must_use]
    pub fn new(
        positions: Vec<PortfolioPosition>,
        total_usd_value: Decimal,
        cash_balance: Decimal,
        fetched_at: i64,
    ) -> Self {
        Self {
            positions,
            total_usd_value,
            cash_balance,
            fetched_at,
        }
    }

    /// Create a snapshot whose total is the sum of position values plus cash.
    #[must_use]
    pub fn from_positions(
        positions: Vec<PortfolioPosition>,
        cash_balance: Decimal,
        fetched_at: i64,
    ) -> Self {
        let total_usd_value =
            positions.iter().map(|p| p.usd_value).sum::<Decimal>() + cash_balance;
        Self::new(positions, total_usd_value, cash_balance, fetched_at)
    }

    /// Validate invariants of a snapshot received from an external source.
    pub fn validate(&self) -> Result<()> {
        if self.fetched_at <= 0 {
            return Err(CoreError::InvalidSnapshot(format!(
                "fetched_at must be positive, got {}",
                self.fetched_at
            )));
        }
        if let Some(p) = self.positions.iter().find(|p| p.available > p.balance) {
            return Err(CoreError::InvalidSnapshot(format!(
                "{}: available {} exceeds balance {}",
                p.currency, p.available, p.balance
            )));
        }
        Ok(())
    }

    pub fn positions(&self) -> &[PortfolioPosition] {
        &self.positions
    }

    pub fn total_usd_value(&self) -> Decimal {
        self.total_usd_value
    }

    pub fn cash_balance(&self) -> Decimal {
        self.cash_balance
    }

    pub fn fetched_at(&self) -> i64 {
        self.fetched_at
    }

    /// Snapshot age in milliseconds at `now_ms` (0 if the clock went backwards).
    #[must_use]
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.fetched_at).max(0)
    }
}
