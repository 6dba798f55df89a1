//! Open position management: protective rules and allocation drift

pub mod rebalancer;
pub mod rules;

pub use rebalancer::{RebalanceInstruction, Rebalancer};
pub use rules::{PositionAction, PositionRulesEngine};
