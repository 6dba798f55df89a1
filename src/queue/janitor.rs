//! Background sweep over failed work items.
//!
//! Retryable failures return to pending after an exponential backoff;
//! exhausted items are buried in the dead letter state. The janitor
//! never touches dead-lettered items.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{JobStore, WorkItem};
use crate::config::QueueConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub rescheduled: u64,
    pub buried: u64,
}

pub struct QueueJanitor {
    store: Arc<dyn JobStore>,
    config: QueueConfig,
    running: Arc<AtomicBool>,
}

impl QueueJanitor {
    pub fn new(store: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        Self {
            store,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Delay before the next automatic attempt, doubling per attempt
    /// already spent, capped at the configured maximum.
    pub fn backoff_duration(&self, attempts: u32) -> Duration {
        let exp = attempts.min(16);
        let secs = self
            .config
            .base_backoff_secs
            .saturating_mul(2u64.saturating_pow(exp));
        Duration::from_secs(secs.min(self.config.max_backoff_secs))
    }

    /// One sweep over the failed set.
    pub async fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        let failed = match self.store.failed_items(100).await {
            Ok(items) => items,
            Err(e) => {
                warn!("janitor could not list failed items: {}", e);
                return stats;
            }
        };

        for item in failed {
            if item.is_exhausted() {
                match self.store.bury(item.id).await {
                    Ok(_) => {
                        warn!(
                            "work item {} ({}) exhausted after {} attempts, dead-lettered: {}",
                            item.id,
                            item.job_type,
                            item.attempts,
                            item.last_error.as_deref().unwrap_or("unknown error")
                        );
                        stats.buried += 1;
                    }
                    Err(e) => debug!("bury of {} raced: {}", item.id, e),
                }
                continue;
            }

            let delay = self.backoff_duration(item.attempts);
            let next_run = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            match self.store.reschedule(item.id, next_run).await {
                Ok(WorkItem { id, attempts, .. }) => {
                    debug!(
                        "work item {} rescheduled (attempt {} of {}) in {:?}",
                        id, attempts, item.max_attempts, delay
                    );
                    stats.rescheduled += 1;
                }
                Err(e) => debug!("reschedule of {} raced: {}", item.id, e),
            }
        }

        stats
    }

    /// Run sweeps on the configured interval until `stop` is called.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let janitor = Arc::clone(&self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(janitor.config.janitor_interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(
                "queue janitor started, sweeping every {}s",
                janitor.config.janitor_interval_secs
            );

            while janitor.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                let stats = janitor.sweep().await;
                if stats.rescheduled > 0 || stats.buried > 0 {
                    info!(
                        "janitor sweep: {} rescheduled, {} dead-lettered",
                        stats.rescheduled, stats.buried
                    );
                }
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
