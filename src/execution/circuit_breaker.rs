//! System-wide order submission circuit breaker.
//!
//! Counts consecutive submission failures across all symbols. At the
//! threshold the breaker opens and every submission is refused until the
//! cooldown elapses or an operator resets it.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub cooldown_remaining_secs: u64,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    consecutive_failures: AtomicU32,
    opened_at: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            consecutive_failures: AtomicU32::new(0),
            opened_at: RwLock::new(None),
        }
    }

    /// Whether submissions may proceed. An open breaker closes itself
    /// once the cooldown has fully elapsed.
    pub async fn allow(&self) -> bool {
        let mut opened = self.opened_at.write().await;
        match *opened {
            None => true,
            Some(at) if at.elapsed() >= self.cooldown => {
                info!("circuit breaker cooldown elapsed, closing");
                *opened = None;
                self.consecutive_failures.store(0, Ordering::SeqCst);
                true
            }
            Some(_) => false,
        }
    }

    /// Record a submission failure; opens the breaker at the threshold.
    pub async fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            let mut opened = self.opened_at.write().await;
            if opened.is_none() {
                warn!(
                    "circuit breaker OPEN after {} consecutive failures, cooling down {}s",
                    failures,
                    self.cooldown.as_secs()
                );
                *opened = Some(Instant::now());
            }
        }
    }

    /// A success while closed resets the failure streak. A success
    /// cannot close an open breaker; only cooldown or reset can.
    pub async fn record_success(&self) {
        if self.opened_at.read().await.is_none() {
            self.consecutive_failures.store(0, Ordering::SeqCst);
        }
    }

    /// Operator reset: close immediately and clear the streak.
    pub async fn reset(&self) {
        info!("circuit breaker manually reset");
        *self.opened_at.write().await = None;
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    pub async fn stats(&self) -> BreakerStats {
        let opened = self.opened_at.read().await;
        let (state, remaining) = match *opened {
            Some(at) => {
                let elapsed = at.elapsed();
                if elapsed >= self.cooldown {
                    (BreakerState::Closed, 0)
                } else {
                    (BreakerState::Open, (self.cooldown - elapsed).as_secs())
                }
            }
            None => (BreakerState::Closed, 0),
        };

        BreakerStats {
            state,
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            failure_threshold: self.failure_threshold,
            cooldown_remaining_secs: remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_at_threshold_and_refuses() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(300));
        assert!(breaker.allow().await);

        for _ in 0..3 {
            breaker.record_failure().await;
        }
        assert!(!breaker.allow().await);
        assert_eq!(breaker.stats().await.state, BreakerState::Open);
    }

    #[tokio::test]
    async fn success_resets_streak_while_closed() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(300));
        breaker.record_failure().await;
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_failure().await;
        breaker.record_failure().await;
        // Streak never reached 3 in a row.
        assert!(breaker.allow().await);
    }

    #[tokio::test]
    async fn success_does_not_close_open_breaker() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(300));
        breaker.record_failure().await;
        assert!(!breaker.allow().await);
        breaker.record_success().await;
        assert!(!breaker.allow().await);
    }

    #[tokio::test]
    async fn cooldown_elapse_closes() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        breaker.record_failure().await;
        assert!(!breaker.allow().await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(breaker.allow().await);
        assert_eq!(breaker.stats().await.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn manual_reset_closes_immediately() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(300));
        breaker.record_failure().await;
        assert!(!breaker.allow().await);
        breaker.reset().await;
        assert!(breaker.allow().await);
    }
}
