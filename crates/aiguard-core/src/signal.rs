//! Trading signal produced by the signal-generation service.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::order::OrderSide;

/// Recommended action carried by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Buy,
    Sell,
    Hold,
}

impl SignalDirection {
    /// Side this signal points to, `None` for HOLD.
    pub fn side(&self) -> Option<OrderSide> {
        match self {
            Self::Buy => Some(OrderSide::Buy),
            Self::Sell => Some(OrderSide::Sell),
            Self::Hold => None,
        }
    }

    /// True if the signal points against a position of `side`.
    pub fn opposes(&self, side: OrderSide) -> bool {
        self.side() == Some(side.opposite())
    }
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Detailed signal for one asset pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    /// Asset pair the signal is for.
    pub asset_pair: String,
    /// Recommended action.
    pub direction: SignalDirection,
    /// Model confidence (0.0-1.0).
    #[serde(default)]
    pub confidence: f64,
    /// Free-form reasoning returned by the model.
    #[serde(default)]
    pub reasoning: Option<String>,
    /// True if the signal came from the fallback (non-LLM) path.
    #[serde(default)]
    pub fallback_used: bool,
}

impl Signal {
    /// Create a signal with no reasoning attached.
    pub fn new(asset_pair: impl Into<String>, direction: SignalDirection, confidence: f64) -> Self {
        Self {
            asset_pair: asset_pair.into(),
            direction,
            confidence,
            reasoning: None,
            fallback_used: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposes() {
        assert!(SignalDirection::Sell.opposes(OrderSide::Buy));
        assert!(SignalDirection::Buy.opposes(OrderSide::Sell));
        assert!(!SignalDirection::Buy.opposes(OrderSide::Buy));
        assert!(!SignalDirection::Hold.opposes(OrderSide::Buy));
        assert!(!SignalDirection::Hold.opposes(OrderSide::Sell));
    }

    #[test]
    fn test_deserialize_minimal_signal() {
        let signal: Signal =
            serde_json::from_str(r#"{"assetPair":"ETH/USD","direction":"SELL"}"#).unwrap();
        assert_eq!(signal.direction, SignalDirection::Sell);
        assert_eq!(signal.confidence, 0.0);
        assert!(!signal.fallback_used);
    }
}
