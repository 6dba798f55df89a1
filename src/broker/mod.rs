//! Broker boundary: the capability set the rest of the core depends on.
//!
//! Everything past this trait works with strictly typed domain structs;
//! the adapter is the single place loose broker payloads are handled.

pub mod alpaca;
pub mod parse;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{AccountSnapshot, BracketOrderRequest, Order, OrderRequest, Position};
use crate::error::Result;

pub use alpaca::AlpacaClient;

/// Filter for listing orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderFilter {
    Open,
    Closed,
    All,
}

impl OrderFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderFilter::Open => "open",
            OrderFilter::Closed => "closed",
            OrderFilter::All => "all",
        }
    }
}

/// Latest quote for a symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
}

impl Quote {
    /// Best usable mark: midpoint when both sides quote, else last trade.
    pub fn mark(&self) -> Decimal {
        if self.bid > Decimal::ZERO && self.ask > Decimal::ZERO {
            (self.bid + self.ask) / Decimal::from(2)
        } else {
            self.last
        }
    }
}

/// Client-observable broker contract
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn get_account(&self) -> Result<AccountSnapshot>;

    async fn get_positions(&self) -> Result<Vec<Position>>;

    async fn get_orders(&self, filter: OrderFilter, limit: usize) -> Result<Vec<Order>>;

    async fn get_order(&self, order_id: &str) -> Result<Order>;

    async fn create_order(&self, request: &OrderRequest) -> Result<Order>;

    async fn create_bracket_order(&self, request: &BracketOrderRequest) -> Result<Order>;

    async fn cancel_order(&self, order_id: &str) -> Result<bool>;

    async fn close_position(&self, symbol: &str) -> Result<Order>;

    async fn get_latest_quote(&self, symbol: &str) -> Result<Quote>;
}
