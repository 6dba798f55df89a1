//! Allocation drift rebalancing.
//!
//! Compares each position's share of portfolio value against its target
//! allocation and plans sells for overweight positions. Buys are left to
//! the analysis cycle; the rebalancer only trims.

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::RebalanceConfig;
use crate::domain::Position;

/// A planned trim for one overweight position
#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceInstruction {
    pub symbol: String,
    pub sell_qty: Decimal,
    pub reason: String,
}

pub struct Rebalancer {
    config: RebalanceConfig,
}

impl Rebalancer {
    pub fn new(config: RebalanceConfig) -> Self {
        Self { config }
    }

    /// Plan trims for positions drifted above target.
    ///
    /// `targets` maps symbol to target percent of portfolio value; a
    /// position without a target is left alone. Sell quantities are
    /// clamped to the available (unreserved) quantity, and a position
    /// with nothing available is skipped with a log line rather than
    /// planned at zero.
    pub fn plan(
        &self,
        positions: &[Position],
        portfolio_value: Decimal,
        targets: &HashMap<String, Decimal>,
    ) -> Vec<RebalanceInstruction> {
        if portfolio_value <= Decimal::ZERO {
            return Vec::new();
        }

        let mut instructions = Vec::new();
        for position in positions {
            let Some(&target_pct) = targets.get(&position.symbol) else {
                continue;
            };
            if position.current_price <= Decimal::ZERO {
                debug!("no price for {}, skipping rebalance", position.symbol);
                continue;
            }

            let current_pct = position.market_value() / portfolio_value * Decimal::from(100);
            let drift = current_pct - target_pct;
            if drift <= self.config.drift_threshold_pct {
                continue;
            }

            if position.available_qty <= Decimal::ZERO {
                warn!(
                    "{} is {}pp overweight but fully reserved by open orders, skipping",
                    position.symbol,
                    drift.round_dp(2)
                );
                continue;
            }

            let excess_value = drift / Decimal::from(100) * portfolio_value;
            let raw_qty = (excess_value / position.current_price).round_dp(4);
            let sell_qty = raw_qty.min(position.available_qty);
            if sell_qty <= Decimal::ZERO {
                continue;
            }

            instructions.push(RebalanceInstruction {
                symbol: position.symbol.clone(),
                sell_qty,
                reason: format!(
                    "rebalance: {} at {}% vs target {}% ({}pp drift)",
                    position.symbol,
                    current_pct.round_dp(2),
                    target_pct,
                    drift.round_dp(2)
                ),
            });
        }
        instructions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rebalancer() -> Rebalancer {
        Rebalancer::new(RebalanceConfig::default())
    }

    fn position(symbol: &str, qty: Decimal, price: Decimal) -> Position {
        let mut p = Position::new(symbol, qty, price);
        p.refresh_price(price);
        p
    }

    #[test]
    fn overweight_position_is_trimmed_to_target() {
        // $15k of AAPL in a $100k portfolio against a 10% target: 5pp over.
        let positions = vec![position("AAPL", dec!(100), dec!(150))];
        let targets = HashMap::from([("AAPL".to_string(), dec!(10))]);

        let plan = rebalancer().plan(&positions, dec!(100000), &targets);
        assert_eq!(plan.len(), 1);
        // $5k excess at $150 a share.
        assert_eq!(plan[0].sell_qty, dec!(33.3333));
        assert!(plan[0].reason.contains("rebalance"));
    }

    #[test]
    fn drift_within_threshold_is_left_alone() {
        // 11.5% vs 10% target: inside the 2pp band.
        let positions = vec![position("AAPL", dec!(100), dec!(115))];
        let targets = HashMap::from([("AAPL".to_string(), dec!(10))]);

        let plan = rebalancer().plan(&positions, dec!(100000), &targets);
        assert!(plan.is_empty());
    }

    #[test]
    fn sell_is_clamped_to_available_qty() {
        let mut p = position("AAPL", dec!(100), dec!(150));
        p.available_qty = dec!(5);
        let targets = HashMap::from([("AAPL".to_string(), dec!(10))]);

        let plan = rebalancer().plan(&[p], dec!(100000), &targets);
        assert_eq!(plan[0].sell_qty, dec!(5));
    }

    #[test]
    fn fully_reserved_position_is_skipped() {
        let mut p = position("AAPL", dec!(100), dec!(150));
        p.available_qty = Decimal::ZERO;
        let targets = HashMap::from([("AAPL".to_string(), dec!(10))]);

        let plan = rebalancer().plan(&[p], dec!(100000), &targets);
        assert!(plan.is_empty());
    }

    #[test]
    fn symbols_without_targets_are_ignored() {
        let positions = vec![position("NVDA", dec!(100), dec!(500))];
        let plan = rebalancer().plan(&positions, dec!(100000), &HashMap::new());
        assert!(plan.is_empty());
    }

    #[test]
    fn empty_portfolio_plans_nothing() {
        let targets = HashMap::from([("AAPL".to_string(), dec!(10))]);
        let plan = rebalancer().plan(&[], Decimal::ZERO, &targets);
        assert!(plan.is_empty());
    }
}
