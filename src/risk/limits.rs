//! Operator-adjustable risk limits.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Limits the risk gate enforces on every proposed trade.
///
/// The kill switch lives here because flipping it is a limit change in
/// the same sense as tightening exposure: it applies immediately to the
/// next evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum single position as percent of portfolio value
    pub max_position_size_pct: Decimal,
    /// Maximum total exposure as percent of portfolio value
    pub max_total_exposure_pct: Decimal,
    /// Maximum number of concurrent open positions
    pub max_positions_count: u32,
    /// Daily loss as percent of the reference baseline that halts trading
    pub daily_loss_limit_pct: Decimal,
    /// Manual or automatic hard halt on all new trades
    pub kill_switch_active: bool,
}

impl RiskLimits {
    /// Basic sanity validation for operator-supplied updates.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_position_size_pct <= Decimal::ZERO {
            return Err("max_position_size_pct must be positive".to_string());
        }
        if self.max_total_exposure_pct < self.max_position_size_pct {
            return Err(
                "max_total_exposure_pct cannot be below max_position_size_pct".to_string(),
            );
        }
        if self.max_positions_count == 0 {
            return Err("max_positions_count must be at least 1".to_string());
        }
        if self.daily_loss_limit_pct <= Decimal::ZERO {
            return Err("daily_loss_limit_pct must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limits() -> RiskLimits {
        RiskLimits {
            max_position_size_pct: dec!(10),
            max_total_exposure_pct: dec!(80),
            max_positions_count: 10,
            daily_loss_limit_pct: dec!(5),
            kill_switch_active: false,
        }
    }

    #[test]
    fn sane_limits_validate() {
        assert!(limits().validate().is_ok());
    }

    #[test]
    fn inverted_exposure_is_rejected() {
        let mut bad = limits();
        bad.max_total_exposure_pct = dec!(5);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn zero_positions_count_is_rejected() {
        let mut bad = limits();
        bad.max_positions_count = 0;
        assert!(bad.validate().is_err());
    }
}
