//! Idempotent durable job queue.
//!
//! Submitting the same logical request twice yields one work item; a
//! claimed item belongs to exactly one worker at a time. Failed items
//! retry with backoff until attempts are exhausted, then move to the
//! dead letter state and wait for an operator.

pub mod janitor;
pub mod job;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;

pub use janitor::{QueueJanitor, SweepStats};
pub use job::{derive_idempotency_key, JobOutcome, JobStatus, JobType, WorkItem};
pub use memory::MemoryJobStore;
pub use postgres::PostgresJobStore;

/// Result of an enqueue: either a fresh item or the already-queued one
#[derive(Debug, Clone)]
pub enum EnqueueResult {
    New(WorkItem),
    Duplicate(WorkItem),
}

impl EnqueueResult {
    pub fn item(&self) -> &WorkItem {
        match self {
            EnqueueResult::New(item) | EnqueueResult::Duplicate(item) => item,
        }
    }

    pub fn into_item(self) -> WorkItem {
        match self {
            EnqueueResult::New(item) | EnqueueResult::Duplicate(item) => item,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, EnqueueResult::Duplicate(_))
    }
}

/// Durable queue contract.
///
/// Two implementations: Postgres for live runs, in-memory for tests and
/// dry runs. Both uphold the same claim and idempotency semantics.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a work item. When a pending or running item already holds
    /// the same idempotency key the existing item comes back unchanged.
    async fn enqueue(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> Result<EnqueueResult>;

    /// Atomically claim the oldest runnable pending item, marking it
    /// running and counting the attempt. Returns `None` when nothing is
    /// due. Concurrent claimers never receive the same item.
    async fn claim_next(&self, types: Option<&[JobType]>) -> Result<Option<WorkItem>>;

    /// Report the outcome of a claimed item. Failure moves the item to
    /// failed, or straight to dead letter once attempts are exhausted.
    async fn complete(&self, id: Uuid, outcome: JobOutcome) -> Result<WorkItem>;

    /// Operator requeue: reset attempts and return a failed or
    /// dead-lettered item to pending.
    async fn requeue(&self, id: Uuid) -> Result<WorkItem>;

    /// Reschedule a failed item for another automatic attempt without
    /// resetting its attempt count.
    async fn reschedule(&self, id: Uuid, next_run_at: chrono::DateTime<chrono::Utc>)
        -> Result<WorkItem>;

    /// Move an exhausted failed item to the dead letter state.
    async fn bury(&self, id: Uuid) -> Result<WorkItem>;

    async fn get(&self, id: Uuid) -> Result<WorkItem>;

    /// Items currently in the failed state, oldest first.
    async fn failed_items(&self, limit: usize) -> Result<Vec<WorkItem>>;

    /// Item counts per status for observability.
    async fn counts(&self) -> Result<HashMap<JobStatus, u64>>;
}
