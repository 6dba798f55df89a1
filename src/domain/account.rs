//! Account state parsed from the broker

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Snapshot of the broker account at a point in time.
///
/// All figures arrive as broker-native text and are parsed defensively at
/// the adapter boundary; a missing or malformed field becomes zero, never
/// an aborted cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Total portfolio value (cash + positions)
    pub equity: Decimal,
    /// Equity at the previous trading day's close, used as the daily P&L
    /// reference point
    pub last_equity: Decimal,
    pub cash: Decimal,
    pub buying_power: Decimal,
    pub taken_at: DateTime<Utc>,
}

impl AccountSnapshot {
    /// Realized + unrealized P&L since the previous close.
    pub fn daily_pnl(&self) -> Decimal {
        self.equity - self.last_equity
    }
}

impl Default for AccountSnapshot {
    fn default() -> Self {
        Self {
            equity: Decimal::ZERO,
            last_equity: Decimal::ZERO,
            cash: Decimal::ZERO,
            buying_power: Decimal::ZERO,
            taken_at: Utc::now(),
        }
    }
}
