//! Order rejection classification and automated remediation.
//!
//! Broker rejection strings are free-form; an ordered pattern table maps
//! them to categories, and each category carries a remedy. Remedies that
//! shrink or amend the request resubmit under a fresh client order id so
//! the broker never sees a duplicate id.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::circuit_breaker::CircuitBreaker;
use crate::broker::BrokerClient;
use crate::domain::{Order, OrderRequest, OrderStatus, TimeInForce};
use crate::error::Result;

/// Why the broker said no
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCategory {
    InsufficientFunds,
    InsufficientQuantity,
    InvalidTimeInForce,
    RateLimited,
    MarketClosed,
    Unknown,
}

impl RejectionCategory {
    /// First matching pattern wins; order matters because broker
    /// messages overlap ("insufficient" appears in two categories).
    pub fn classify(reason: &str) -> Self {
        let lowered = reason.to_lowercase();
        const TABLE: &[(&str, RejectionCategory)] = &[
            ("insufficient buying power", RejectionCategory::InsufficientFunds),
            ("insufficient funds", RejectionCategory::InsufficientFunds),
            ("insufficient balance", RejectionCategory::InsufficientFunds),
            ("insufficient qty", RejectionCategory::InsufficientQuantity),
            ("insufficient quantity", RejectionCategory::InsufficientQuantity),
            ("not enough shares", RejectionCategory::InsufficientQuantity),
            ("time in force", RejectionCategory::InvalidTimeInForce),
            ("time_in_force", RejectionCategory::InvalidTimeInForce),
            ("rate limit", RejectionCategory::RateLimited),
            ("too many requests", RejectionCategory::RateLimited),
            ("market is closed", RejectionCategory::MarketClosed),
            ("market closed", RejectionCategory::MarketClosed),
            ("outside regular trading hours", RejectionCategory::MarketClosed),
        ];

        for (pattern, category) in TABLE {
            if lowered.contains(pattern) {
                return *category;
            }
        }
        RejectionCategory::Unknown
    }

    /// Whether an automated retry can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RejectionCategory::MarketClosed | RejectionCategory::Unknown
        )
    }
}

impl std::fmt::Display for RejectionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectionCategory::InsufficientFunds => "insufficient_funds",
            RejectionCategory::InsufficientQuantity => "insufficient_quantity",
            RejectionCategory::InvalidTimeInForce => "invalid_time_in_force",
            RejectionCategory::RateLimited => "rate_limited",
            RejectionCategory::MarketClosed => "market_closed",
            RejectionCategory::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Result of the retry ladder for one rejected order
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    /// The accepted replacement order, when a remedy worked.
    pub resolved: Option<Order>,
    pub attempts: u32,
    pub final_category: RejectionCategory,
    pub final_reason: String,
}

impl RetryOutcome {
    pub fn succeeded(&self) -> bool {
        self.resolved.is_some()
    }
}

pub struct RejectionHandler {
    broker: Arc<dyn BrokerClient>,
    breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl RejectionHandler {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        breaker: Arc<CircuitBreaker>,
        max_retries: u32,
    ) -> Self {
        Self {
            broker,
            breaker,
            max_retries,
            retry_base_delay: Duration::from_millis(500),
        }
    }

    #[cfg(test)]
    fn with_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Apply the category's remedy to the request. `None` means no
    /// automated remedy exists and the rejection is final.
    fn remediate(category: RejectionCategory, request: &OrderRequest) -> Option<OrderRequest> {
        match category {
            RejectionCategory::InsufficientFunds | RejectionCategory::InsufficientQuantity => {
                let mut amended = request.clone();
                if let Some(qty) = amended.qty {
                    let halved = (qty / Decimal::from(2)).round_dp(4);
                    if halved <= Decimal::ZERO {
                        return None;
                    }
                    amended.qty = Some(halved);
                } else if let Some(notional) = amended.notional {
                    let halved = (notional / Decimal::from(2)).round_dp(2);
                    if halved < Decimal::ONE {
                        return None;
                    }
                    amended.notional = Some(halved);
                } else {
                    return None;
                }
                Some(amended)
            }
            RejectionCategory::InvalidTimeInForce => {
                let mut amended = request.clone();
                amended.time_in_force = TimeInForce::Day;
                Some(amended)
            }
            RejectionCategory::RateLimited => Some(request.clone()),
            RejectionCategory::MarketClosed | RejectionCategory::Unknown => None,
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        use rand::Rng;
        let jitter_ms = rand::thread_rng().gen_range(0..250);
        self.retry_base_delay * attempt.max(1) + Duration::from_millis(jitter_ms)
    }

    /// Walk the retry ladder for a rejected submission.
    ///
    /// Every rejection, including ones seen inside the ladder, counts
    /// against the system-wide circuit breaker. An open breaker stops
    /// the ladder immediately.
    pub async fn handle_rejection(
        &self,
        request: &OrderRequest,
        reason: &str,
    ) -> Result<RetryOutcome> {
        let mut category = RejectionCategory::classify(reason);
        let mut last_reason = reason.to_string();
        let mut current = request.clone();
        let mut attempts = 0;

        warn!(
            "order for {} rejected ({}): {}",
            request.symbol, category, last_reason
        );
        self.breaker.record_failure().await;

        while attempts < self.max_retries {
            if !category.is_retryable() {
                break;
            }
            let Some(amended) = Self::remediate(category, &current) else {
                break;
            };
            if !self.breaker.allow().await {
                warn!("circuit breaker open, abandoning retry of {}", request.symbol);
                break;
            }

            attempts += 1;
            tokio::time::sleep(self.retry_delay(attempts)).await;

            // Fresh id: the broker treats a reused client id as a dup.
            current = amended.with_fresh_client_id();
            info!(
                "retry {} of {} for {} ({})",
                attempts, self.max_retries, current.symbol, category
            );

            match self.broker.create_order(&current).await {
                Ok(order) if order.status != OrderStatus::Rejected => {
                    self.breaker.record_success().await;
                    info!(
                        "retry accepted for {} as order {:?}",
                        current.symbol, order.broker_order_id
                    );
                    return Ok(RetryOutcome {
                        resolved: Some(order),
                        attempts,
                        final_category: category,
                        final_reason: last_reason,
                    });
                }
                Ok(order) => {
                    last_reason = order
                        .rejection_reason
                        .unwrap_or_else(|| "rejected without reason".to_string());
                    category = RejectionCategory::classify(&last_reason);
                    warn!(
                        "retry {} rejected again ({}): {}",
                        attempts, category, last_reason
                    );
                    self.breaker.record_failure().await;
                }
                Err(e) => {
                    last_reason = e.to_string();
                    category = RejectionCategory::classify(&last_reason);
                    warn!("retry {} submission error: {}", attempts, last_reason);
                    self.breaker.record_failure().await;
                }
            }
        }

        Ok(RetryOutcome {
            resolved: None,
            attempts,
            final_category: category,
            final_reason: last_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{OrderFilter, Quote};
    use crate::domain::{
        AccountSnapshot, BracketOrderRequest, OrderSide, OrderType, Position,
    };
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    #[test]
    fn classification_order_matters() {
        assert_eq!(
            RejectionCategory::classify("Insufficient buying power for order"),
            RejectionCategory::InsufficientFunds
        );
        assert_eq!(
            RejectionCategory::classify("insufficient qty available (10 < 20)"),
            RejectionCategory::InsufficientQuantity
        );
        assert_eq!(
            RejectionCategory::classify("invalid time_in_force for asset class"),
            RejectionCategory::InvalidTimeInForce
        );
        assert_eq!(
            RejectionCategory::classify("429 too many requests"),
            RejectionCategory::RateLimited
        );
        assert_eq!(
            RejectionCategory::classify("market is closed"),
            RejectionCategory::MarketClosed
        );
        assert_eq!(
            RejectionCategory::classify("wash trade detected"),
            RejectionCategory::Unknown
        );
    }

    #[test]
    fn funds_remedy_halves_quantity() {
        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10));
        let amended =
            RejectionHandler::remediate(RejectionCategory::InsufficientFunds, &request).unwrap();
        assert_eq!(amended.qty, Some(dec!(5)));
    }

    #[test]
    fn unknown_and_market_closed_have_no_remedy() {
        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10));
        assert!(RejectionHandler::remediate(RejectionCategory::Unknown, &request).is_none());
        assert!(RejectionHandler::remediate(RejectionCategory::MarketClosed, &request).is_none());
    }

    #[test]
    fn tif_remedy_switches_to_day() {
        let mut request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10));
        request.time_in_force = TimeInForce::Gtc;
        let amended =
            RejectionHandler::remediate(RejectionCategory::InvalidTimeInForce, &request).unwrap();
        assert_eq!(amended.time_in_force, TimeInForce::Day);
    }

    /// Broker double scripting create_order responses.
    struct RetryBroker {
        responses: StdMutex<VecDeque<Result<Order>>>,
        seen_client_ids: StdMutex<Vec<String>>,
        seen_qtys: StdMutex<Vec<Option<rust_decimal::Decimal>>>,
    }

    impl RetryBroker {
        fn new(responses: Vec<Result<Order>>) -> Self {
            Self {
                responses: StdMutex::new(responses.into_iter().collect()),
                seen_client_ids: StdMutex::new(Vec::new()),
                seen_qtys: StdMutex::new(Vec::new()),
            }
        }
    }

    fn accepted_order() -> Order {
        Order {
            id: Uuid::new_v4(),
            broker_order_id: Some("bo-2".into()),
            client_order_id: None,
            symbol: "AAPL".into(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            qty: Some(dec!(5)),
            notional: None,
            status: OrderStatus::Accepted,
            filled_qty: rust_decimal::Decimal::ZERO,
            filled_avg_price: rust_decimal::Decimal::ZERO,
            rejection_reason: None,
            submitted_at: None,
            filled_at: None,
        }
    }

    fn rejected_order(reason: &str) -> Order {
        let mut order = accepted_order();
        order.status = OrderStatus::Rejected;
        order.rejection_reason = Some(reason.to_string());
        order
    }

    #[async_trait]
    impl BrokerClient for RetryBroker {
        async fn get_account(&self) -> Result<AccountSnapshot> {
            Ok(AccountSnapshot::default())
        }
        async fn get_positions(&self) -> Result<Vec<Position>> {
            Ok(vec![])
        }
        async fn get_orders(&self, _: OrderFilter, _: usize) -> Result<Vec<Order>> {
            Ok(vec![])
        }
        async fn get_order(&self, _: &str) -> Result<Order> {
            unimplemented!()
        }
        async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
            self.seen_client_ids
                .lock()
                .unwrap()
                .push(request.client_order_id.clone());
            self.seen_qtys.lock().unwrap().push(request.qty);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(accepted_order()))
        }
        async fn create_bracket_order(&self, _: &BracketOrderRequest) -> Result<Order> {
            unimplemented!()
        }
        async fn cancel_order(&self, _: &str) -> Result<bool> {
            Ok(true)
        }
        async fn close_position(&self, _: &str) -> Result<Order> {
            unimplemented!()
        }
        async fn get_latest_quote(&self, _: &str) -> Result<Quote> {
            unimplemented!()
        }
    }

    fn handler(broker: Arc<RetryBroker>, threshold: u32) -> RejectionHandler {
        let breaker = Arc::new(CircuitBreaker::new(threshold, Duration::from_secs(300)));
        RejectionHandler::new(broker, breaker, 3).with_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn halved_retry_succeeds_with_fresh_client_id() {
        let broker = Arc::new(RetryBroker::new(vec![Ok(accepted_order())]));
        let handler = handler(Arc::clone(&broker), 10);

        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10));
        let original_id = request.client_order_id.clone();
        let outcome = handler
            .handle_rejection(&request, "insufficient buying power")
            .await
            .unwrap();

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 1);

        let ids = broker.seen_client_ids.lock().unwrap();
        assert_eq!(ids.len(), 1);
        assert_ne!(ids[0], original_id);
        let qtys = broker.seen_qtys.lock().unwrap();
        assert_eq!(qtys[0], Some(dec!(5)));
    }

    #[tokio::test]
    async fn quantity_keeps_halving_across_rejections() {
        let broker = Arc::new(RetryBroker::new(vec![
            Ok(rejected_order("insufficient buying power")),
            Ok(accepted_order()),
        ]));
        let handler = handler(Arc::clone(&broker), 10);

        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10));
        let outcome = handler
            .handle_rejection(&request, "insufficient buying power")
            .await
            .unwrap();

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 2);
        let qtys = broker.seen_qtys.lock().unwrap();
        assert_eq!(*qtys, vec![Some(dec!(5)), Some(dec!(2.5))]);
    }

    #[tokio::test]
    async fn permanent_rejection_never_resubmits() {
        let broker = Arc::new(RetryBroker::new(vec![]));
        let handler = handler(Arc::clone(&broker), 10);

        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10));
        let outcome = handler
            .handle_rejection(&request, "market is closed")
            .await
            .unwrap();

        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.final_category, RejectionCategory::MarketClosed);
        assert!(broker.seen_client_ids.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_breaker_stops_the_ladder() {
        let broker = Arc::new(RetryBroker::new(vec![Ok(accepted_order())]));
        // Threshold 1: the initial rejection alone opens the breaker.
        let handler = handler(Arc::clone(&broker), 1);

        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10));
        let outcome = handler
            .handle_rejection(&request, "insufficient buying power")
            .await
            .unwrap();

        assert!(!outcome.succeeded());
        assert_eq!(outcome.attempts, 0);
        assert!(broker.seen_client_ids.lock().unwrap().is_empty());
    }
}
