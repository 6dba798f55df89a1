//! Per-position protective rules.
//!
//! Evaluated against every open position each management cycle. Rules
//! run in severity order and the first match wins, so a position gets at
//! most one action per cycle.

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::PositionRulesConfig;
use crate::domain::Position;

/// What the rules engine wants done with one position
#[derive(Debug, Clone, PartialEq)]
pub enum PositionAction {
    /// Sell `fraction` of the position (1 = full close).
    ClosePosition { fraction: Decimal, reason: String },
    /// Ratchet the stop up; stops only ever move toward the price.
    RaiseStop { new_stop: Decimal },
    Hold,
}

pub struct PositionRulesEngine {
    config: PositionRulesConfig,
}

impl PositionRulesEngine {
    pub fn new(config: PositionRulesConfig) -> Self {
        Self { config }
    }

    /// The stop that actually protects the position: the custom stop if
    /// one is set, but never below the hard floor under the entry price.
    pub fn effective_stop(&self, position: &Position) -> Decimal {
        let floor = position.entry_price * (Decimal::ONE - self.config.hard_stop_loss_pct);
        match position.stop_loss_price {
            Some(stop) if stop > floor => stop,
            _ => floor,
        }
    }

    /// Raise a stored stop onto the hard floor. Run at position sync so
    /// a position imported without a stop still has one.
    pub fn apply_hard_floor(&self, position: &mut Position) {
        let floor = position.entry_price * (Decimal::ONE - self.config.hard_stop_loss_pct);
        match position.stop_loss_price {
            Some(stop) if stop >= floor => {}
            _ => {
                debug!(
                    "raising stop for {} to hard floor {}",
                    position.symbol,
                    floor.round_dp(4)
                );
                position.stop_loss_price = Some(floor);
            }
        }
    }

    /// Evaluate one position. Order: emergency stop, stop-loss, tiered
    /// take-profit at the target price, trailing ratchet.
    pub fn evaluate(&self, position: &Position) -> PositionAction {
        let pnl_pct = position.unrealized_pnl_pct;

        if pnl_pct <= -self.config.emergency_stop_pct {
            return PositionAction::ClosePosition {
                fraction: Decimal::ONE,
                reason: format!(
                    "emergency stop: {} down {}%",
                    position.symbol,
                    (-pnl_pct).round_dp(2)
                ),
            };
        }

        let stop = self.effective_stop(position);
        if position.current_price <= stop {
            return PositionAction::ClosePosition {
                fraction: Decimal::ONE,
                reason: format!(
                    "stop-loss: {} at {} breached stop {}",
                    position.symbol,
                    position.current_price,
                    stop.round_dp(4)
                ),
            };
        }

        // Take-profit only arms once the target price is reached; the
        // size of the close then follows the gain. A target touched on a
        // thin gain takes nothing off yet.
        if let Some(target) = position.take_profit_price {
            if position.current_price >= target {
                if pnl_pct > Decimal::from(15) {
                    return PositionAction::ClosePosition {
                        fraction: Decimal::ONE,
                        reason: format!(
                            "take-profit: {} hit {} up {}%, closing full position",
                            position.symbol,
                            target,
                            pnl_pct.round_dp(2)
                        ),
                    };
                }
                if pnl_pct > Decimal::from(10) {
                    return PositionAction::ClosePosition {
                        fraction: Decimal::new(5, 1),
                        reason: format!(
                            "take-profit: {} hit {} up {}%, closing half",
                            position.symbol,
                            target,
                            pnl_pct.round_dp(2)
                        ),
                    };
                }
            }
        }

        if pnl_pct > self.config.trailing_activation_pct {
            let trail = position
                .trailing_stop_pct
                .unwrap_or(self.config.default_trailing_pct);
            let candidate = position.current_price * (Decimal::ONE - trail);
            if candidate > stop {
                return PositionAction::RaiseStop {
                    new_stop: candidate,
                };
            }
        }

        PositionAction::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn engine() -> PositionRulesEngine {
        PositionRulesEngine::new(PositionRulesConfig::default())
    }

    fn position(entry: Decimal, current: Decimal) -> Position {
        let mut p = Position::new("AAPL", dec!(10), entry);
        p.refresh_price(current);
        p
    }

    #[test]
    fn emergency_beats_everything() {
        // Down 9% with a custom stop far below the price.
        let mut p = position(dec!(100), dec!(91));
        p.stop_loss_price = Some(dec!(50));
        match engine().evaluate(&p) {
            PositionAction::ClosePosition { fraction, reason } => {
                assert_eq!(fraction, Decimal::ONE);
                assert!(reason.contains("emergency"));
            }
            other => panic!("expected emergency close, got {:?}", other),
        }
    }

    #[test]
    fn stop_floor_triggers_even_without_custom_stop() {
        // Down 4%: past the 3% hard floor but not the emergency level.
        let p = position(dec!(100), dec!(96));
        match engine().evaluate(&p) {
            PositionAction::ClosePosition { reason, .. } => {
                assert!(reason.contains("stop-loss"));
            }
            other => panic!("expected stop close, got {:?}", other),
        }
    }

    #[test]
    fn custom_stop_above_floor_wins() {
        let mut p = position(dec!(100), dec!(98.5));
        p.stop_loss_price = Some(dec!(99));
        match engine().evaluate(&p) {
            PositionAction::ClosePosition { reason, .. } => {
                assert!(reason.contains("stop-loss"));
            }
            other => panic!("expected stop close, got {:?}", other),
        }
    }

    #[test]
    fn custom_stop_below_floor_is_ignored() {
        let mut p = position(dec!(100), dec!(96));
        p.stop_loss_price = Some(dec!(90));
        assert_eq!(engine().effective_stop(&p), dec!(97));
        assert!(matches!(
            engine().evaluate(&p),
            PositionAction::ClosePosition { .. }
        ));
    }

    #[test]
    fn big_winner_at_target_closes_fully() {
        let mut p = position(dec!(100), dec!(116));
        p.take_profit_price = Some(dec!(110));
        match engine().evaluate(&p) {
            PositionAction::ClosePosition { fraction, .. } => {
                assert_eq!(fraction, Decimal::ONE)
            }
            other => panic!("expected full close, got {:?}", other),
        }
    }

    #[test]
    fn moderate_winner_at_target_closes_half() {
        let mut p = position(dec!(100), dec!(112));
        p.take_profit_price = Some(dec!(110));
        match engine().evaluate(&p) {
            PositionAction::ClosePosition { fraction, .. } => {
                assert_eq!(fraction, dec!(0.5))
            }
            other => panic!("expected half close, got {:?}", other),
        }
    }

    #[test]
    fn boundary_fifteen_percent_closes_half_not_full() {
        let mut p = position(dec!(100), dec!(115));
        p.take_profit_price = Some(dec!(110));
        match engine().evaluate(&p) {
            PositionAction::ClosePosition { fraction, .. } => {
                assert_eq!(fraction, dec!(0.5))
            }
            other => panic!("expected half close at 15%, got {:?}", other),
        }
    }

    #[test]
    fn gains_alone_never_trigger_take_profit() {
        // Up 12% with no target set: the trailing ratchet may act, but
        // nothing is sold.
        let p = position(dec!(100), dec!(112));
        match engine().evaluate(&p) {
            PositionAction::RaiseStop { new_stop } => {
                assert_eq!(new_stop, dec!(106.40));
            }
            other => panic!("expected raised stop, got {:?}", other),
        }

        // Same gain with the target still above the price.
        let mut p = position(dec!(100), dec!(112));
        p.take_profit_price = Some(dec!(120));
        assert!(matches!(
            engine().evaluate(&p),
            PositionAction::RaiseStop { .. }
        ));
    }

    #[test]
    fn target_touched_at_thin_gain_waits() {
        let mut p = position(dec!(100), dec!(104));
        p.take_profit_price = Some(dec!(104));
        assert_eq!(engine().evaluate(&p), PositionAction::Hold);
    }

    #[test]
    fn trailing_ratchets_above_activation() {
        // Up 8%: trailing zone. Stop should land 5% under the price.
        let p = position(dec!(100), dec!(108));
        match engine().evaluate(&p) {
            PositionAction::RaiseStop { new_stop } => {
                assert_eq!(new_stop, dec!(102.60));
            }
            other => panic!("expected raised stop, got {:?}", other),
        }
    }

    #[test]
    fn trailing_never_lowers_an_existing_stop() {
        let mut p = position(dec!(100), dec!(108));
        p.stop_loss_price = Some(dec!(105));
        // Candidate 102.60 is below the held stop, so nothing moves.
        assert_eq!(engine().evaluate(&p), PositionAction::Hold);
    }

    #[test]
    fn small_gain_holds() {
        let p = position(dec!(100), dec!(102));
        assert_eq!(engine().evaluate(&p), PositionAction::Hold);
    }

    #[test]
    fn hard_floor_is_applied_at_sync() {
        let mut p = position(dec!(100), dec!(100));
        engine().apply_hard_floor(&mut p);
        assert_eq!(p.stop_loss_price, Some(dec!(97)));

        // A tighter custom stop survives the floor.
        p.stop_loss_price = Some(dec!(99));
        engine().apply_hard_floor(&mut p);
        assert_eq!(p.stop_loss_price, Some(dec!(99)));
    }
}
