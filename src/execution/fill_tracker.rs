//! Order fill tracking.
//!
//! Polls the broker until an order reaches a terminal state or the
//! timeout expires. A status of filled is only trusted once fill data
//! (average price and quantity) is actually present; brokers report the
//! status a beat before the numbers.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::broker::BrokerClient;
use crate::config::ExecutionConfig;
use crate::domain::Order;
use crate::error::Result;

/// What the tracker observed by the time it returned
#[derive(Debug, Clone)]
pub struct FillOutcome {
    pub order: Order,
    pub timed_out: bool,
    pub polls: u32,
}

impl FillOutcome {
    pub fn has_fill_data(&self) -> bool {
        self.order.has_fill_data()
    }

    /// Fully filled with trustworthy fill data.
    pub fn is_fully_filled(&self) -> bool {
        self.order.status == crate::domain::OrderStatus::Filled && self.order.has_fill_data()
    }

    /// Terminal without ever filling (canceled, expired, rejected).
    pub fn died_unfilled(&self) -> bool {
        self.order.status.is_terminal_without_fill()
    }
}

pub struct FillTracker {
    broker: Arc<dyn BrokerClient>,
    poll_interval: Duration,
    timeout: Duration,
}

impl FillTracker {
    pub fn new(broker: Arc<dyn BrokerClient>, config: &ExecutionConfig) -> Self {
        Self {
            broker,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            timeout: Duration::from_millis(config.fill_timeout_ms),
        }
    }

    /// Follow an order until it settles or the timeout expires.
    ///
    /// Poll errors are logged and polling continues; a broker blip must
    /// not abandon a live order. On timeout one final status check runs
    /// so a fill that landed during the last interval is not missed.
    pub async fn wait_for_fill(&self, broker_order_id: &str) -> Result<FillOutcome> {
        let started = Instant::now();
        let mut polls: u32 = 0;
        let mut last_seen: Option<Order> = None;

        while started.elapsed() < self.timeout {
            tokio::time::sleep(self.poll_interval).await;
            polls += 1;

            match self.broker.get_order(broker_order_id).await {
                Ok(order) => {
                    if let Some(outcome) = Self::settle(order.clone(), false, polls) {
                        Self::log_outcome(&outcome);
                        return Ok(outcome);
                    }
                    last_seen = Some(order);
                }
                Err(e) => {
                    warn!("poll {} of order {} failed: {}", polls, broker_order_id, e);
                }
            }
        }

        // Final check after the deadline.
        debug!(
            "order {} not settled after {:?}, running final check",
            broker_order_id, self.timeout
        );
        let order = match self.broker.get_order(broker_order_id).await {
            Ok(order) => order,
            Err(e) => {
                warn!("final check of order {} failed: {}", broker_order_id, e);
                match last_seen {
                    Some(order) => order,
                    None => return Err(e),
                }
            }
        };

        polls += 1;
        if let Some(outcome) = Self::settle(order.clone(), false, polls) {
            Self::log_outcome(&outcome);
            return Ok(outcome);
        }

        let outcome = FillOutcome {
            order,
            timed_out: true,
            polls,
        };
        warn!(
            "order {} timed out after {} polls in status {} (filled_qty={})",
            broker_order_id, polls, outcome.order.status, outcome.order.filled_qty
        );
        Ok(outcome)
    }

    /// A settled outcome, or `None` when polling should continue.
    fn settle(order: Order, timed_out: bool, polls: u32) -> Option<FillOutcome> {
        use crate::domain::OrderStatus;

        match order.status {
            // Filled without fill data is not settled yet; the numbers
            // usually arrive on the next poll.
            OrderStatus::Filled if order.has_fill_data() => Some(FillOutcome {
                order,
                timed_out,
                polls,
            }),
            status if status.is_terminal_without_fill() => Some(FillOutcome {
                order,
                timed_out,
                polls,
            }),
            _ => None,
        }
    }

    fn log_outcome(outcome: &FillOutcome) {
        if outcome.is_fully_filled() {
            info!(
                "order {} filled: {} @ {} ({} polls)",
                outcome.order.broker_order_id.as_deref().unwrap_or("?"),
                outcome.order.filled_qty,
                outcome.order.filled_avg_price,
                outcome.polls
            );
        } else if outcome.died_unfilled() {
            info!(
                "order {} ended {} without filling",
                outcome.order.broker_order_id.as_deref().unwrap_or("?"),
                outcome.order.status
            );
        }
    }
}
