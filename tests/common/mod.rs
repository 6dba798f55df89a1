//! Shared test doubles for pipeline tests.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use steward::broker::{BrokerClient, OrderFilter, Quote};
use steward::domain::{
    AccountSnapshot, BracketOrderRequest, MarketSnapshot, Order, OrderRequest, OrderStatus,
    Position, TradeSignal,
};
use steward::engine::DecisionEngine;
use steward::error::{Result, StewardError};

/// Scriptable broker double. Fields are mutexed so tests can steer
/// behavior mid-scenario.
pub struct MockBroker {
    pub account: Mutex<AccountSnapshot>,
    pub positions: Mutex<Vec<Position>>,
    pub quotes: Mutex<HashMap<String, Quote>>,
    /// Scripted create_order responses; an accepted order once empty.
    pub create_responses: Mutex<VecDeque<Result<Order>>>,
    /// Scripted get_order lookups by broker order id; instant fill when
    /// an id is not scripted.
    pub orders: Mutex<HashMap<String, Order>>,
    pub created: Mutex<Vec<OrderRequest>>,
    pub closed_symbols: Mutex<Vec<String>>,
    pub fail_account: AtomicBool,
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            account: Mutex::new(AccountSnapshot {
                equity: dec!(100000),
                last_equity: dec!(100000),
                cash: dec!(100000),
                buying_power: dec!(100000),
                taken_at: chrono::Utc::now(),
            }),
            positions: Mutex::new(Vec::new()),
            quotes: Mutex::new(HashMap::new()),
            create_responses: Mutex::new(VecDeque::new()),
            orders: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            closed_symbols: Mutex::new(Vec::new()),
            fail_account: AtomicBool::new(false),
        }
    }

    pub fn set_account(&self, equity: Decimal, last_equity: Decimal) {
        let mut account = self.account.lock().unwrap();
        account.equity = equity;
        account.last_equity = last_equity;
        account.buying_power = equity;
    }

    pub fn add_position(&self, position: Position) {
        self.positions.lock().unwrap().push(position);
    }

    pub fn set_quote(&self, symbol: &str, price: Decimal) {
        self.quotes.lock().unwrap().insert(
            symbol.to_string(),
            Quote {
                symbol: symbol.to_string(),
                bid: price,
                ask: price,
                last: price,
            },
        );
    }

    pub fn set_order(&self, order: Order) {
        if let Some(id) = order.broker_order_id.clone() {
            self.orders.lock().unwrap().insert(id, order);
        }
    }

    pub fn filled_order(symbol: &str, qty: Decimal, price: Decimal) -> Order {
        Order {
            id: Uuid::new_v4(),
            broker_order_id: Some(format!("bo-{}", Uuid::new_v4())),
            client_order_id: None,
            symbol: symbol.to_string(),
            side: steward::domain::OrderSide::Buy,
            order_type: steward::domain::OrderType::Market,
            qty: Some(qty),
            notional: None,
            status: OrderStatus::Filled,
            filled_qty: qty,
            filled_avg_price: price,
            rejection_reason: None,
            submitted_at: Some(chrono::Utc::now()),
            filled_at: Some(chrono::Utc::now()),
        }
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn get_account(&self) -> Result<AccountSnapshot> {
        if self.fail_account.load(Ordering::SeqCst) {
            return Err(StewardError::Broker("account endpoint down".to_string()));
        }
        Ok(self.account.lock().unwrap().clone())
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn get_orders(&self, _: OrderFilter, _: usize) -> Result<Vec<Order>> {
        Ok(vec![])
    }

    async fn get_order(&self, order_id: &str) -> Result<Order> {
        if let Some(order) = self.orders.lock().unwrap().get(order_id) {
            return Ok(order.clone());
        }
        // Unscripted orders fill instantly in these scenarios.
        let mut order = Self::filled_order("AAPL", dec!(1), dec!(100));
        order.broker_order_id = Some(order_id.to_string());
        Ok(order)
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        self.created.lock().unwrap().push(request.clone());
        if let Some(scripted) = self.create_responses.lock().unwrap().pop_front() {
            return scripted;
        }
        let mut order = Self::filled_order(
            &request.symbol,
            request.qty.unwrap_or(dec!(1)),
            dec!(100),
        );
        order.status = OrderStatus::Accepted;
        order.filled_qty = Decimal::ZERO;
        order.filled_avg_price = Decimal::ZERO;
        order.side = request.side;
        Ok(order)
    }

    async fn create_bracket_order(&self, request: &BracketOrderRequest) -> Result<Order> {
        self.create_order(&request.entry).await
    }

    async fn cancel_order(&self, _: &str) -> Result<bool> {
        Ok(true)
    }

    async fn close_position(&self, symbol: &str) -> Result<Order> {
        self.closed_symbols.lock().unwrap().push(symbol.to_string());
        let mut order = Self::filled_order(symbol, dec!(1), dec!(100));
        order.side = steward::domain::OrderSide::Sell;
        Ok(order)
    }

    async fn get_latest_quote(&self, symbol: &str) -> Result<Quote> {
        self.quotes
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| StewardError::Broker(format!("no quote for {}", symbol)))
    }
}

/// Engine double returning one scripted signal per symbol.
pub struct MockEngine {
    pub signals: Mutex<HashMap<String, TradeSignal>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            signals: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_signal(&self, signal: TradeSignal) {
        self.signals
            .lock()
            .unwrap()
            .insert(signal.symbol.clone(), signal);
    }
}

#[async_trait]
impl DecisionEngine for MockEngine {
    async fn analyze_opportunity(
        &self,
        symbol: &str,
        _market_data: &MarketSnapshot,
        _news_context: Option<&str>,
        _strategy_context: Option<&str>,
    ) -> Result<TradeSignal> {
        self.signals
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| StewardError::DecisionEngineUnavailable(symbol.to_string()))
    }
}
