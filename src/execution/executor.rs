//! Order executor: submission, fill tracking, and rejection recovery in
//! one pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use super::circuit_breaker::CircuitBreaker;
use super::fill_tracker::{FillOutcome, FillTracker};
use super::rejection::RejectionHandler;
use crate::broker::BrokerClient;
use crate::config::ExecutionConfig;
use crate::domain::{BracketOrderRequest, Order, OrderRequest, OrderStatus};
use crate::error::{Result, StewardError};

/// Cumulative execution counters
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    pub submitted: AtomicU64,
    pub filled: AtomicU64,
    pub rejected: AtomicU64,
    pub recovered: AtomicU64,
    pub timed_out: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub filled: u64,
    pub rejected: u64,
    pub recovered: u64,
    pub timed_out: u64,
}

impl ExecutionMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            filled: self.filled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

pub struct OrderExecutor {
    broker: Arc<dyn BrokerClient>,
    fill_tracker: FillTracker,
    rejections: RejectionHandler,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<ExecutionMetrics>,
}

impl OrderExecutor {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        breaker: Arc<CircuitBreaker>,
        config: &ExecutionConfig,
    ) -> Self {
        let fill_tracker = FillTracker::new(Arc::clone(&broker), config);
        let rejections = RejectionHandler::new(
            Arc::clone(&broker),
            Arc::clone(&breaker),
            config.max_retries,
        );
        Self {
            broker,
            fill_tracker,
            rejections,
            breaker,
            metrics: Arc::new(ExecutionMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    /// Submit an order and follow it to settlement.
    ///
    /// Rejections run through the remediation ladder; an accepted order
    /// is tracked until filled, dead, or timed out. Orders still open at
    /// the timeout are cancelled so no unsupervised order lingers.
    pub async fn execute(&self, request: &OrderRequest) -> Result<FillOutcome> {
        if !self.breaker.allow().await {
            return Err(StewardError::CircuitBreakerOpen(format!(
                "refusing submission for {}",
                request.symbol
            )));
        }

        self.metrics.submitted.fetch_add(1, Ordering::Relaxed);
        let order = match self.broker.create_order(request).await {
            Ok(order) => order,
            Err(StewardError::OrderRejected(reason)) => {
                return self.recover(request, &reason).await;
            }
            Err(e) => {
                self.breaker.record_failure().await;
                return Err(e);
            }
        };

        if order.status == OrderStatus::Rejected {
            let reason = order
                .rejection_reason
                .clone()
                .unwrap_or_else(|| "rejected without reason".to_string());
            return self.recover(request, &reason).await;
        }

        self.breaker.record_success().await;
        self.track(order).await
    }

    /// Submit a bracket entry with attached stop and target.
    ///
    /// Bracket rejections are not remediated automatically; amending a
    /// leg can invert the protective prices, so they surface as errors.
    pub async fn execute_bracket(&self, request: &BracketOrderRequest) -> Result<FillOutcome> {
        if !self.breaker.allow().await {
            return Err(StewardError::CircuitBreakerOpen(format!(
                "refusing bracket submission for {}",
                request.entry.symbol
            )));
        }

        self.metrics.submitted.fetch_add(1, Ordering::Relaxed);
        let order = match self.broker.create_bracket_order(request).await {
            Ok(order) => order,
            Err(e) => {
                self.breaker.record_failure().await;
                self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        if order.status == OrderStatus::Rejected {
            self.breaker.record_failure().await;
            self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(StewardError::OrderRejected(
                order
                    .rejection_reason
                    .unwrap_or_else(|| "bracket rejected without reason".to_string()),
            ));
        }

        self.breaker.record_success().await;
        self.track(order).await
    }

    async fn recover(&self, request: &OrderRequest, reason: &str) -> Result<FillOutcome> {
        self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
        let outcome = self.rejections.handle_rejection(request, reason).await?;

        match outcome.resolved {
            Some(order) => {
                self.metrics.recovered.fetch_add(1, Ordering::Relaxed);
                self.track(order).await
            }
            None => Err(StewardError::OrderRejected(format!(
                "{} after {} retries ({}): {}",
                request.symbol, outcome.attempts, outcome.final_category, outcome.final_reason
            ))),
        }
    }

    async fn track(&self, order: Order) -> Result<FillOutcome> {
        let Some(broker_order_id) = order.broker_order_id.clone() else {
            // Accepted but no id to poll; nothing more we can do.
            warn!("order for {} accepted without a broker id", order.symbol);
            return Ok(FillOutcome {
                order,
                timed_out: false,
                polls: 0,
            });
        };

        let outcome = self.fill_tracker.wait_for_fill(&broker_order_id).await?;

        if outcome.is_fully_filled() {
            self.metrics.filled.fetch_add(1, Ordering::Relaxed);
        } else if outcome.timed_out {
            self.metrics.timed_out.fetch_add(1, Ordering::Relaxed);
            if outcome.order.filled_qty.is_zero() {
                info!(
                    "cancelling unfilled order {} after timeout",
                    broker_order_id
                );
                if let Err(e) = self.broker.cancel_order(&broker_order_id).await {
                    warn!("cancel of timed-out order {} failed: {}", broker_order_id, e);
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{OrderFilter, Quote};
    use crate::domain::{AccountSnapshot, OrderSide, OrderType, Position};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use uuid::Uuid;

    fn fast_config() -> ExecutionConfig {
        ExecutionConfig {
            fill_timeout_ms: 100,
            poll_interval_ms: 10,
            max_retries: 2,
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 300,
        }
    }

    struct StubBroker {
        submit_status: OrderStatus,
        poll_status: OrderStatus,
        cancelled: StdMutex<Vec<String>>,
    }

    impl StubBroker {
        fn order(&self, status: OrderStatus) -> Order {
            let filled = status == OrderStatus::Filled;
            Order {
                id: Uuid::new_v4(),
                broker_order_id: Some("bo-9".into()),
                client_order_id: None,
                symbol: "AAPL".into(),
                side: OrderSide::Buy,
                order_type: OrderType::Market,
                qty: Some(dec!(10)),
                notional: None,
                status,
                filled_qty: if filled { dec!(10) } else { Decimal::ZERO },
                filled_avg_price: if filled { dec!(150) } else { Decimal::ZERO },
                rejection_reason: None,
                submitted_at: None,
                filled_at: None,
            }
        }
    }

    #[async_trait]
    impl BrokerClient for StubBroker {
        async fn get_account(&self) -> crate::error::Result<AccountSnapshot> {
            Ok(AccountSnapshot::default())
        }
        async fn get_positions(&self) -> crate::error::Result<Vec<Position>> {
            Ok(vec![])
        }
        async fn get_orders(
            &self,
            _: OrderFilter,
            _: usize,
        ) -> crate::error::Result<Vec<Order>> {
            Ok(vec![])
        }
        async fn get_order(&self, _: &str) -> crate::error::Result<Order> {
            Ok(self.order(self.poll_status))
        }
        async fn create_order(&self, _: &OrderRequest) -> crate::error::Result<Order> {
            Ok(self.order(self.submit_status))
        }
        async fn create_bracket_order(
            &self,
            _: &BracketOrderRequest,
        ) -> crate::error::Result<Order> {
            Ok(self.order(self.submit_status))
        }
        async fn cancel_order(&self, order_id: &str) -> crate::error::Result<bool> {
            self.cancelled.lock().unwrap().push(order_id.to_string());
            Ok(true)
        }
        async fn close_position(&self, _: &str) -> crate::error::Result<Order> {
            unimplemented!()
        }
        async fn get_latest_quote(&self, _: &str) -> crate::error::Result<Quote> {
            unimplemented!()
        }
    }

    fn executor(broker: Arc<StubBroker>) -> OrderExecutor {
        let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(300)));
        OrderExecutor::new(broker, breaker, &fast_config())
    }

    #[tokio::test]
    async fn clean_fill_updates_metrics() {
        let broker = Arc::new(StubBroker {
            submit_status: OrderStatus::Accepted,
            poll_status: OrderStatus::Filled,
            cancelled: StdMutex::new(vec![]),
        });
        let executor = executor(Arc::clone(&broker));

        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10));
        let outcome = executor.execute(&request).await.unwrap();

        assert!(outcome.is_fully_filled());
        let metrics = executor.metrics().snapshot();
        assert_eq!(metrics.submitted, 1);
        assert_eq!(metrics.filled, 1);
        assert_eq!(metrics.rejected, 0);
    }

    #[tokio::test]
    async fn timed_out_unfilled_order_is_cancelled() {
        let broker = Arc::new(StubBroker {
            submit_status: OrderStatus::Accepted,
            poll_status: OrderStatus::Accepted,
            cancelled: StdMutex::new(vec![]),
        });
        let executor = executor(Arc::clone(&broker));

        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10));
        let outcome = executor.execute(&request).await.unwrap();

        assert!(outcome.timed_out);
        assert_eq!(executor.metrics().snapshot().timed_out, 1);
        assert_eq!(broker.cancelled.lock().unwrap().as_slice(), ["bo-9"]);
    }

    #[tokio::test]
    async fn open_breaker_refuses_before_submission() {
        let broker = Arc::new(StubBroker {
            submit_status: OrderStatus::Accepted,
            poll_status: OrderStatus::Filled,
            cancelled: StdMutex::new(vec![]),
        });
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(300)));
        let executor = OrderExecutor::new(Arc::clone(&broker) as Arc<dyn BrokerClient>, breaker.clone(), &fast_config());
        breaker.record_failure().await;

        let request = OrderRequest::market("AAPL", OrderSide::Buy, dec!(10));
        let result = executor.execute(&request).await;
        assert!(matches!(result, Err(StewardError::CircuitBreakerOpen(_))));
        assert_eq!(executor.metrics().snapshot().submitted, 0);
    }
}
