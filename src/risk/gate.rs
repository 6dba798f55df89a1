//! Pre-trade risk gate.
//!
//! Pure decision logic over a snapshot of account, positions, and
//! limits. Checks run in a fixed order and the first failure wins; only
//! the daily loss breach, checked last, asks the caller to latch the
//! kill switch.

use rust_decimal::Decimal;

use crate::config::DailyLossBasis;
use crate::domain::{AccountSnapshot, Position};
use crate::error::RiskError;

use super::RiskLimits;

/// A trade the orchestrator wants to place, reduced to what the gate
/// needs to know.
#[derive(Debug, Clone)]
pub struct ProposedTrade {
    pub symbol: String,
    /// Notional value of the proposed entry in account currency.
    pub notional: Decimal,
}

/// Gate verdict
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Allow,
    Reject {
        reason: String,
        /// The breach is severe enough that all further trading must stop.
        trip_kill_switch: bool,
    },
}

impl RiskDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskDecision::Allow)
    }

    fn reject(error: RiskError) -> Self {
        RiskDecision::Reject {
            reason: error.to_string(),
            trip_kill_switch: false,
        }
    }

    fn halt(error: RiskError) -> Self {
        RiskDecision::Reject {
            reason: error.to_string(),
            trip_kill_switch: true,
        }
    }
}

/// Daily loss as a positive percent of the configured baseline.
pub fn daily_loss_pct(
    account: &AccountSnapshot,
    basis: DailyLossBasis,
    fixed_baseline: Decimal,
) -> Decimal {
    let pnl = account.daily_pnl();
    if pnl >= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let denominator = match basis {
        DailyLossBasis::LiveEquity => account.last_equity,
        DailyLossBasis::FixedBaseline => fixed_baseline,
    };
    if denominator <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (-pnl / denominator) * Decimal::from(100)
}

/// Evaluate a proposed entry against the current limits.
///
/// Check order: kill switch, position count, single position size,
/// total exposure, buying power, daily loss. Only the daily loss breach
/// trips the kill switch, so an ordinary limit rejection is never
/// escalated when both happen to hold.
pub fn evaluate(
    proposed: &ProposedTrade,
    positions: &[Position],
    account: &AccountSnapshot,
    limits: &RiskLimits,
    basis: DailyLossBasis,
    fixed_baseline: Decimal,
) -> RiskDecision {
    if limits.kill_switch_active {
        return RiskDecision::Reject {
            reason: "kill switch active".to_string(),
            trip_kill_switch: false,
        };
    }

    // Adding to an existing position does not consume a position slot.
    let holds_symbol = positions.iter().any(|p| p.symbol == proposed.symbol);
    if !holds_symbol && positions.len() >= limits.max_positions_count as usize {
        return RiskDecision::reject(RiskError::MaxPositionsCount {
            count: positions.len(),
            limit: limits.max_positions_count,
        });
    }

    let portfolio_value = account.equity;
    if portfolio_value <= Decimal::ZERO {
        return RiskDecision::reject(RiskError::InsufficientBuyingPower {
            requested: proposed.notional,
            available: account.buying_power,
        });
    }

    let position_pct = proposed.notional / portfolio_value * Decimal::from(100);
    if position_pct > limits.max_position_size_pct {
        return RiskDecision::reject(RiskError::MaxPositionSize {
            limit: limits.max_position_size_pct,
            requested: position_pct.round_dp(2),
        });
    }

    let total_value: Decimal = positions.iter().map(|p| p.market_value()).sum();
    let exposure_pct = (total_value + proposed.notional) / portfolio_value * Decimal::from(100);
    if exposure_pct > limits.max_total_exposure_pct {
        return RiskDecision::reject(RiskError::MaxTotalExposure {
            limit: limits.max_total_exposure_pct,
            projected: exposure_pct.round_dp(2),
        });
    }

    if proposed.notional > account.buying_power {
        return RiskDecision::reject(RiskError::InsufficientBuyingPower {
            requested: proposed.notional,
            available: account.buying_power,
        });
    }

    let loss_pct = daily_loss_pct(account, basis, fixed_baseline);
    if loss_pct >= limits.daily_loss_limit_pct {
        return RiskDecision::halt(RiskError::DailyLossLimit {
            loss_pct,
            limit_pct: limits.daily_loss_limit_pct,
        });
    }

    RiskDecision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn account(equity: Decimal, last_equity: Decimal) -> AccountSnapshot {
        AccountSnapshot {
            equity,
            last_equity,
            cash: equity,
            buying_power: equity,
            taken_at: Utc::now(),
        }
    }

    fn limits() -> RiskLimits {
        RiskLimits {
            max_position_size_pct: dec!(10),
            max_total_exposure_pct: dec!(50),
            max_positions_count: 3,
            daily_loss_limit_pct: dec!(5),
            kill_switch_active: false,
        }
    }

    fn position(symbol: &str, qty: Decimal, price: Decimal) -> Position {
        let mut p = Position::new(symbol, qty, price);
        p.refresh_price(price);
        p
    }

    fn trade(notional: Decimal) -> ProposedTrade {
        ProposedTrade {
            symbol: "AAPL".to_string(),
            notional,
        }
    }

    #[test]
    fn clean_trade_is_allowed() {
        let decision = evaluate(
            &trade(dec!(5000)),
            &[],
            &account(dec!(100000), dec!(100000)),
            &limits(),
            DailyLossBasis::LiveEquity,
            dec!(100000),
        );
        assert_eq!(decision, RiskDecision::Allow);
    }

    #[test]
    fn kill_switch_rejects_without_tripping_again() {
        let mut limits = limits();
        limits.kill_switch_active = true;
        let decision = evaluate(
            &trade(dec!(100)),
            &[],
            &account(dec!(100000), dec!(100000)),
            &limits,
            DailyLossBasis::LiveEquity,
            dec!(100000),
        );
        match decision {
            RiskDecision::Reject {
                trip_kill_switch, ..
            } => assert!(!trip_kill_switch),
            RiskDecision::Allow => panic!("kill switch must reject"),
        }
    }

    #[test]
    fn daily_loss_breach_trips_kill_switch() {
        // Down 6% on the day against a 5% limit.
        let decision = evaluate(
            &trade(dec!(100)),
            &[],
            &account(dec!(94000), dec!(100000)),
            &limits(),
            DailyLossBasis::LiveEquity,
            dec!(100000),
        );
        match decision {
            RiskDecision::Reject {
                trip_kill_switch,
                reason,
            } => {
                assert!(trip_kill_switch);
                assert!(reason.contains("Daily loss limit"));
            }
            RiskDecision::Allow => panic!("loss breach must reject"),
        }
    }

    #[test]
    fn fixed_baseline_changes_the_denominator() {
        // $3k loss: 3% of live equity basis, 6% of a $50k fixed baseline.
        let acct = account(dec!(97000), dec!(100000));
        assert_eq!(
            daily_loss_pct(&acct, DailyLossBasis::LiveEquity, dec!(50000)),
            dec!(3)
        );
        assert_eq!(
            daily_loss_pct(&acct, DailyLossBasis::FixedBaseline, dec!(50000)),
            dec!(6)
        );
    }

    #[test]
    fn position_count_blocks_new_symbols_only() {
        let held = vec![
            position("MSFT", dec!(10), dec!(100)),
            position("GOOG", dec!(10), dec!(100)),
            position("AMZN", dec!(10), dec!(100)),
        ];
        let acct = account(dec!(100000), dec!(100000));

        let blocked = evaluate(
            &trade(dec!(100)),
            &held,
            &acct,
            &limits(),
            DailyLossBasis::LiveEquity,
            dec!(100000),
        );
        assert!(!blocked.is_allowed());

        // Same count, but adding to a symbol already held.
        let add_on = ProposedTrade {
            symbol: "MSFT".to_string(),
            notional: dec!(100),
        };
        let allowed = evaluate(
            &add_on,
            &held,
            &acct,
            &limits(),
            DailyLossBasis::LiveEquity,
            dec!(100000),
        );
        assert!(allowed.is_allowed());
    }

    #[test]
    fn position_size_caps_the_proposed_value() {
        // $12k proposed against a 10% cap on $100k.
        let decision = evaluate(
            &trade(dec!(12000)),
            &[],
            &account(dec!(100000), dec!(100000)),
            &limits(),
            DailyLossBasis::LiveEquity,
            dec!(100000),
        );
        match decision {
            RiskDecision::Reject { reason, .. } => {
                assert!(reason.contains("Max position size"))
            }
            RiskDecision::Allow => panic!("size breach must reject"),
        }

        // An add-on is sized on its own value, not the combined holding.
        let held = vec![position("AAPL", dec!(80), dec!(100))];
        let decision = evaluate(
            &trade(dec!(3000)),
            &held,
            &account(dec!(100000), dec!(100000)),
            &limits(),
            DailyLossBasis::LiveEquity,
            dec!(100000),
        );
        assert!(decision.is_allowed());
    }

    #[test]
    fn total_exposure_is_capped() {
        // 48% deployed across symbols; $5k more crosses the 50% cap.
        let held = vec![
            position("MSFT", dec!(240), dec!(100)),
            position("GOOG", dec!(240), dec!(100)),
        ];
        let decision = evaluate(
            &trade(dec!(5000)),
            &held,
            &account(dec!(100000), dec!(100000)),
            &limits(),
            DailyLossBasis::LiveEquity,
            dec!(100000),
        );
        match decision {
            RiskDecision::Reject { reason, .. } => {
                assert!(reason.contains("Max total exposure"))
            }
            RiskDecision::Allow => panic!("exposure breach must reject"),
        }
    }

    #[test]
    fn buying_power_shortfall_rejects() {
        let mut acct = account(dec!(100000), dec!(100000));
        acct.buying_power = dec!(1000);
        let decision = evaluate(
            &trade(dec!(5000)),
            &[],
            &acct,
            &limits(),
            DailyLossBasis::LiveEquity,
            dec!(100000),
        );
        match decision {
            RiskDecision::Reject { reason, .. } => {
                assert!(reason.contains("Insufficient buying power"))
            }
            RiskDecision::Allow => panic!("buying power breach must reject"),
        }
    }

    #[test]
    fn ordinary_limit_breach_wins_over_a_simultaneous_daily_loss() {
        // Position count at limit while also down 6% on the day: the
        // count rejection comes back and the kill switch stays untouched.
        let held = vec![
            position("MSFT", dec!(10), dec!(100)),
            position("GOOG", dec!(10), dec!(100)),
            position("AMZN", dec!(10), dec!(100)),
        ];
        let decision = evaluate(
            &trade(dec!(100)),
            &held,
            &account(dec!(94000), dec!(100000)),
            &limits(),
            DailyLossBasis::LiveEquity,
            dec!(100000),
        );
        match decision {
            RiskDecision::Reject {
                reason,
                trip_kill_switch,
            } => {
                assert!(reason.contains("Max positions count"));
                assert!(!trip_kill_switch);
            }
            RiskDecision::Allow => panic!("count breach must reject"),
        }
    }
}
