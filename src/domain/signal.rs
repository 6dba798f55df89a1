//! Decision engine signal types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Action recommended by the decision engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "buy"),
            SignalAction::Sell => write!(f, "sell"),
            SignalAction::Hold => write!(f, "hold"),
        }
    }
}

/// A scored trading opportunity for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub symbol: String,
    pub action: SignalAction,
    /// Confidence in 0..1; the orchestrator only acts at or above its
    /// configured threshold
    pub confidence: f64,
    /// Suggested position size as percent of portfolio value
    pub suggested_qty_pct: Decimal,
    pub target_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub reasoning: String,
}

impl TradeSignal {
    /// Whether this signal clears the action threshold.
    pub fn is_actionable(&self, min_confidence: f64) -> bool {
        self.action != SignalAction::Hold && self.confidence >= min_confidence
    }
}

/// Market context handed to the decision engine for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn new(symbol: impl Into<String>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            bid: None,
            ask: None,
            volume: None,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn signal(action: SignalAction, confidence: f64) -> TradeSignal {
        TradeSignal {
            symbol: "AAPL".to_string(),
            action,
            confidence,
            suggested_qty_pct: dec!(5),
            target_price: None,
            stop_loss: None,
            reasoning: "test".to_string(),
        }
    }

    #[test]
    fn hold_is_never_actionable() {
        assert!(!signal(SignalAction::Hold, 0.99).is_actionable(0.7));
    }

    #[test]
    fn confidence_threshold_gates_action() {
        assert!(!signal(SignalAction::Buy, 0.69).is_actionable(0.7));
        assert!(signal(SignalAction::Buy, 0.7).is_actionable(0.7));
        assert!(signal(SignalAction::Sell, 0.85).is_actionable(0.7));
    }
}
