//! REST broker adapter.
//!
//! Speaks the Alpaca-style trading API: key/secret header auth, JSON
//! bodies, quantity and price fields as strings. This is the only module
//! that touches raw broker payloads.

use chrono::Utc;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::parse;
use super::{BrokerClient, OrderFilter, Quote};
use crate::config::BrokerConfig;
use crate::domain::{
    AccountSnapshot, BracketOrderRequest, Order, OrderRequest, OrderSide, OrderStatus, OrderType,
    Position,
};
use crate::error::{Result, StewardError};

/// Broker REST client
pub struct AlpacaClient {
    http: reqwest::Client,
    rest_url: String,
    data_url: String,
    api_key: String,
    api_secret: String,
    dry_run: bool,
}

impl AlpacaClient {
    pub fn new(config: &BrokerConfig, dry_run: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            rest_url: config.rest_url.trim_end_matches('/').to_string(),
            data_url: config
                .data_url
                .as_deref()
                .unwrap_or(&config.rest_url)
                .trim_end_matches('/')
                .to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            dry_run,
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.rest_url, path);
        let response = self.request(reqwest::Method::GET, url).send().await?;
        Self::read_body(response).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.rest_url, path);
        let response = self
            .request(reqwest::Method::POST, url)
            .json(body)
            .send()
            .await?;
        Self::read_body(response).await
    }

    async fn read_body(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(body);
        }

        let message = parse::string_opt(body.get("message"))
            .unwrap_or_else(|| format!("broker returned {}", status));

        match status {
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::FORBIDDEN => {
                Err(StewardError::OrderRejected(message))
            }
            StatusCode::NOT_FOUND => Err(StewardError::OrderNotFound(message)),
            _ => Err(StewardError::Broker(message)),
        }
    }

    fn order_from_json(raw: &Value) -> Order {
        let status_str = parse::string_or_empty(raw.get("status"));
        Order {
            id: Uuid::new_v4(),
            broker_order_id: parse::string_opt(raw.get("id")),
            client_order_id: parse::string_opt(raw.get("client_order_id")),
            symbol: parse::string_or_empty(raw.get("symbol")),
            side: if parse::string_or_empty(raw.get("side")) == "sell" {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            },
            order_type: match parse::string_or_empty(raw.get("type")).as_str() {
                "limit" => OrderType::Limit,
                "stop" => OrderType::Stop,
                "stop_limit" => OrderType::StopLimit,
                _ => OrderType::Market,
            },
            qty: parse::decimal_opt(raw.get("qty")),
            notional: parse::decimal_opt(raw.get("notional")),
            status: OrderStatus::from_broker(&status_str),
            filled_qty: parse::decimal_or_zero(raw.get("filled_qty")),
            filled_avg_price: parse::decimal_or_zero(raw.get("filled_avg_price")),
            rejection_reason: parse::string_opt(raw.get("reject_reason")),
            submitted_at: parse::timestamp_opt(raw.get("submitted_at")),
            filled_at: parse::timestamp_opt(raw.get("filled_at")),
        }
    }

    fn position_from_json(raw: &Value) -> Position {
        let qty = parse::decimal_or_zero(raw.get("qty"));
        let available = parse::decimal_opt(raw.get("qty_available")).unwrap_or(qty);
        let entry = parse::decimal_or_zero(raw.get("avg_entry_price"));
        let current = parse::decimal_or_zero(raw.get("current_price"));

        let mut position = Position::new(parse::string_or_empty(raw.get("symbol")), qty, entry);
        position.available_qty = available;
        if current > Decimal::ZERO {
            position.refresh_price(current);
        }
        position
    }

    fn order_body(request: &OrderRequest) -> Value {
        let mut body = json!({
            "symbol": request.symbol,
            "side": request.side.as_str(),
            "type": request.order_type.as_str(),
            "time_in_force": request.time_in_force.as_str(),
            "client_order_id": request.client_order_id,
        });

        if let Some(qty) = request.qty {
            body["qty"] = json!(qty.to_string());
        }
        if let Some(notional) = request.notional {
            body["notional"] = json!(notional.to_string());
        }
        if let Some(limit) = request.limit_price {
            body["limit_price"] = json!(limit.to_string());
        }
        body
    }

    fn dry_run_order(request: &OrderRequest) -> Order {
        Order {
            id: Uuid::new_v4(),
            broker_order_id: Some(format!("dry-{}", Uuid::new_v4())),
            client_order_id: Some(request.client_order_id.clone()),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            qty: request.qty,
            notional: request.notional,
            status: OrderStatus::Accepted,
            filled_qty: Decimal::ZERO,
            filled_avg_price: Decimal::ZERO,
            rejection_reason: None,
            submitted_at: Some(Utc::now()),
            filled_at: None,
        }
    }
}

#[async_trait::async_trait]
impl BrokerClient for AlpacaClient {
    async fn get_account(&self) -> Result<AccountSnapshot> {
        let raw = self.get_json("/v2/account").await?;
        Ok(AccountSnapshot {
            equity: parse::decimal_or_zero(raw.get("equity")),
            last_equity: parse::decimal_or_zero(raw.get("last_equity")),
            cash: parse::decimal_or_zero(raw.get("cash")),
            buying_power: parse::decimal_or_zero(raw.get("buying_power")),
            taken_at: Utc::now(),
        })
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        let raw = self.get_json("/v2/positions").await?;
        let positions = raw
            .as_array()
            .map(|items| items.iter().map(Self::position_from_json).collect())
            .unwrap_or_default();
        Ok(positions)
    }

    async fn get_orders(&self, filter: OrderFilter, limit: usize) -> Result<Vec<Order>> {
        let raw = self
            .get_json(&format!(
                "/v2/orders?status={}&limit={}",
                filter.as_str(),
                limit
            ))
            .await?;
        let orders = raw
            .as_array()
            .map(|items| items.iter().map(Self::order_from_json).collect())
            .unwrap_or_default();
        Ok(orders)
    }

    async fn get_order(&self, order_id: &str) -> Result<Order> {
        let raw = self.get_json(&format!("/v2/orders/{}", order_id)).await?;
        Ok(Self::order_from_json(&raw))
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        if self.dry_run {
            info!(
                "[dry-run] {} {} {:?} {}",
                request.side, request.symbol, request.qty, request.client_order_id
            );
            return Ok(Self::dry_run_order(request));
        }

        debug!(
            "submitting order: {} {} client_id={}",
            request.side, request.symbol, request.client_order_id
        );
        let raw = self.post_json("/v2/orders", &Self::order_body(request)).await?;
        Ok(Self::order_from_json(&raw))
    }

    async fn create_bracket_order(&self, request: &BracketOrderRequest) -> Result<Order> {
        if self.dry_run {
            info!(
                "[dry-run] bracket {} {} tp={} sl={}",
                request.entry.side,
                request.entry.symbol,
                request.take_profit_price,
                request.stop_loss_price
            );
            return Ok(Self::dry_run_order(&request.entry));
        }

        let mut body = Self::order_body(&request.entry);
        body["order_class"] = json!("bracket");
        body["take_profit"] = json!({ "limit_price": request.take_profit_price.to_string() });
        body["stop_loss"] = json!({ "stop_price": request.stop_loss_price.to_string() });

        let raw = self.post_json("/v2/orders", &body).await?;
        Ok(Self::order_from_json(&raw))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        if self.dry_run {
            info!("[dry-run] cancel order {}", order_id);
            return Ok(true);
        }

        let url = format!("{}/v2/orders/{}", self.rest_url, order_id);
        let response = self.request(reqwest::Method::DELETE, url).send().await?;
        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                warn!("cancel of {} returned {}", order_id, status);
                Ok(false)
            }
        }
    }

    async fn close_position(&self, symbol: &str) -> Result<Order> {
        if self.dry_run {
            info!("[dry-run] close position {}", symbol);
            let request = OrderRequest::market(symbol, OrderSide::Sell, Decimal::ZERO);
            return Ok(Self::dry_run_order(&request));
        }

        let url = format!("{}/v2/positions/{}", self.rest_url, symbol);
        let response = self.request(reqwest::Method::DELETE, url).send().await?;
        let raw = Self::read_body(response).await?;
        Ok(Self::order_from_json(&raw))
    }

    async fn get_latest_quote(&self, symbol: &str) -> Result<Quote> {
        let url = format!("{}/v2/stocks/{}/quotes/latest", self.data_url, symbol);
        let response = self.request(reqwest::Method::GET, url).send().await?;
        let raw = Self::read_body(response).await?;
        let quote = raw.get("quote").unwrap_or(&raw);

        Ok(Quote {
            symbol: symbol.to_string(),
            bid: parse::decimal_or_zero(quote.get("bp")),
            ask: parse::decimal_or_zero(quote.get("ap")),
            last: parse::decimal_or_zero(quote.get("last")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn order_parsing_tolerates_partial_payload() {
        let raw = json!({
            "id": "abc-123",
            "symbol": "AAPL",
            "side": "buy",
            "status": "filled",
            "filled_qty": "10",
            "filled_avg_price": "150.50"
        });
        let order = AlpacaClient::order_from_json(&raw);
        assert_eq!(order.broker_order_id.as_deref(), Some("abc-123"));
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_qty, dec!(10));
        assert_eq!(order.filled_avg_price, dec!(150.50));
        assert!(order.has_fill_data());
    }

    #[test]
    fn order_parsing_never_fails_on_garbage_numbers() {
        let raw = json!({
            "id": "abc-123",
            "symbol": "AAPL",
            "side": "sell",
            "status": "filled",
            "filled_qty": "oops",
            "filled_avg_price": null
        });
        let order = AlpacaClient::order_from_json(&raw);
        assert_eq!(order.filled_qty, Decimal::ZERO);
        assert_eq!(order.filled_avg_price, Decimal::ZERO);
        // Reported filled but no fill data: must not be trusted.
        assert!(!order.has_fill_data());
    }

    #[test]
    fn position_available_defaults_to_total() {
        let raw = json!({
            "symbol": "MSFT",
            "qty": "20",
            "avg_entry_price": "300",
            "current_price": "310"
        });
        let position = AlpacaClient::position_from_json(&raw);
        assert_eq!(position.qty, dec!(20));
        assert_eq!(position.available_qty, dec!(20));
        assert_eq!(position.current_price, dec!(310));
    }

    #[test]
    fn position_respects_reserved_quantity() {
        let raw = json!({
            "symbol": "MSFT",
            "qty": "20",
            "qty_available": "15",
            "avg_entry_price": "300",
            "current_price": "310"
        });
        let position = AlpacaClient::position_from_json(&raw);
        assert_eq!(position.available_qty, dec!(15));
    }
}
