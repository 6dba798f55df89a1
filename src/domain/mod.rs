//! Core domain records shared across the pipeline

pub mod account;
pub mod execution;
pub mod order;
pub mod position;
pub mod signal;

pub use account::AccountSnapshot;
pub use execution::{ExecutionAction, ExecutionHistory, ExecutionResult};
pub use order::{
    BracketOrderRequest, Order, OrderRequest, OrderSide, OrderStatus, OrderType, TimeInForce,
};
pub use position::Position;
pub use signal::{MarketSnapshot, SignalAction, TradeSignal};
