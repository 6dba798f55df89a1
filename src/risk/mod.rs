//! Pre-trade risk management

pub mod gate;
pub mod limits;

pub use gate::{daily_loss_pct, evaluate, ProposedTrade, RiskDecision};
pub use limits::RiskLimits;
