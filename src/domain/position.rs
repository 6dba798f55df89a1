//! Open position state owned by the orchestration process

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An open position, exclusively owned by the orchestrator's position cache
/// and periodically reconciled against the broker (broker wins on conflict).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Total quantity held
    pub qty: Decimal,
    /// Quantity not reserved by open orders. Selling must never request
    /// more than this.
    pub available_qty: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_pct: Decimal,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub trailing_stop_pct: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    pub strategy_id: Option<String>,
}

impl Position {
    pub fn new(symbol: impl Into<String>, qty: Decimal, entry_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            available_qty: qty,
            entry_price,
            current_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            unrealized_pnl_pct: Decimal::ZERO,
            stop_loss_price: None,
            take_profit_price: None,
            trailing_stop_pct: None,
            opened_at: Utc::now(),
            strategy_id: None,
        }
    }

    /// Current market value of the whole position.
    pub fn market_value(&self) -> Decimal {
        self.qty * self.current_price
    }

    /// Refresh mark price and derived P&L figures.
    pub fn refresh_price(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealized_pnl = (price - self.entry_price) * self.qty;
        self.unrealized_pnl_pct = if self.entry_price > Decimal::ZERO {
            (price - self.entry_price) / self.entry_price * Decimal::from(100)
        } else {
            Decimal::ZERO
        };
    }

    /// Near-zero positions are deleted rather than carried.
    pub fn is_closed(&self) -> bool {
        self.qty.abs() < Decimal::new(1, 6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn refresh_price_updates_pnl() {
        let mut pos = Position::new("AAPL", dec!(10), dec!(100));
        pos.refresh_price(dec!(110));
        assert_eq!(pos.unrealized_pnl, dec!(100));
        assert_eq!(pos.unrealized_pnl_pct, dec!(10));

        pos.refresh_price(dec!(91));
        assert_eq!(pos.unrealized_pnl, dec!(-90));
        assert_eq!(pos.unrealized_pnl_pct, dec!(-9));
    }

    #[test]
    fn near_zero_quantity_counts_as_closed() {
        let mut pos = Position::new("AAPL", dec!(10), dec!(100));
        assert!(!pos.is_closed());
        pos.qty = dec!(0.0000001);
        assert!(pos.is_closed());
    }
}
