//! Client-side order mirror and submission request types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::StopLimit => "stop_limit",
        }
    }
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Day => "day",
            TimeInForce::Gtc => "gtc",
            TimeInForce::Ioc => "ioc",
            TimeInForce::Fok => "fok",
        }
    }
}

/// Normalized order status.
///
/// Broker status strings vary; `from_broker` maps them onto this fixed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
    Suspended,
    PendingCancel,
    Unknown,
}

impl OrderStatus {
    pub fn from_broker(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "new" | "pending_new" => OrderStatus::New,
            "accepted" | "open" | "submitted" => OrderStatus::Accepted,
            "partially_filled" | "partial_fill" => OrderStatus::PartiallyFilled,
            "filled" => OrderStatus::Filled,
            "canceled" | "cancelled" | "done_for_day" => OrderStatus::Canceled,
            "expired" => OrderStatus::Expired,
            "rejected" => OrderStatus::Rejected,
            "suspended" | "held" | "stopped" => OrderStatus::Suspended,
            "pending_cancel" => OrderStatus::PendingCancel,
            _ => OrderStatus::Unknown,
        }
    }

    /// Terminal states that can never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Expired
                | OrderStatus::Rejected
                | OrderStatus::Suspended
        )
    }

    /// Terminal states that carry no fill by definition.
    pub fn is_terminal_without_fill(&self) -> bool {
        matches!(
            self,
            OrderStatus::Canceled
                | OrderStatus::Expired
                | OrderStatus::Rejected
                | OrderStatus::Suspended
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Accepted => "accepted",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Expired => "expired",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Suspended => "suspended",
            OrderStatus::PendingCancel => "pending_cancel",
            OrderStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Client-side mirror of a broker order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    /// Broker-assigned order id
    pub broker_order_id: Option<String>,
    /// Client-assigned id used for idempotent submission
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Requested quantity (exclusive with notional)
    pub qty: Option<Decimal>,
    /// Requested notional value (exclusive with qty)
    pub notional: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    pub filled_avg_price: Decimal,
    pub rejection_reason: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Whether realized economics may be computed from this order.
    ///
    /// An order missing fill data must never be treated as filled even if
    /// its reported status says so.
    pub fn has_fill_data(&self) -> bool {
        self.filled_avg_price > Decimal::ZERO && self.filled_qty > Decimal::ZERO
    }

    /// Total value of the filled part.
    pub fn fill_value(&self) -> Decimal {
        self.filled_qty * self.filled_avg_price
    }
}

/// Parameters for a new order submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Option<Decimal>,
    pub notional: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, qty: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            qty: Some(qty),
            notional: None,
            limit_price: None,
            time_in_force: TimeInForce::Day,
        }
    }

    pub fn market_notional(symbol: impl Into<String>, side: OrderSide, notional: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            qty: None,
            notional: Some(notional),
            limit_price: None,
            time_in_force: TimeInForce::Day,
        }
    }

    /// Copy of this request under a fresh idempotent client id.
    pub fn with_fresh_client_id(&self) -> Self {
        let mut req = self.clone();
        req.client_order_id = Uuid::new_v4().to_string();
        req
    }
}

/// Parameters for a bracket order: entry plus automatic exit legs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketOrderRequest {
    pub entry: OrderRequest,
    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,
}
