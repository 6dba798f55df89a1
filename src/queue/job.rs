//! Durable work item records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Kind of deferred work a queue item carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    SubmitOrder,
    CancelOrder,
    SyncPositions,
    ClosePosition,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::SubmitOrder => "submit_order",
            JobType::CancelOrder => "cancel_order",
            JobType::SyncPositions => "sync_positions",
            JobType::ClosePosition => "close_position",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submit_order" => Some(JobType::SubmitOrder),
            "cancel_order" => Some(JobType::CancelOrder),
            "sync_positions" => Some(JobType::SyncPositions),
            "close_position" => Some(JobType::ClosePosition),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a work item.
///
/// Dead-lettered items are terminal for automatic processing; only an
/// operator requeue can resurrect them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    DeadLetter,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::DeadLetter => "dead_letter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "dead_letter" => Some(JobStatus::DeadLetter),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome a worker reports when finishing a claimed item
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Success,
    Failure(String),
}

/// One unit of durable work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_run_at: DateTime<Utc>,
    pub idempotency_key: Option<String>,
    pub last_error: Option<String>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(
        job_type: JobType,
        payload: Value,
        idempotency_key: Option<String>,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            next_run_at: now,
            idempotency_key,
            last_error: None,
            payload,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Deterministic idempotency key when the caller supplies none.
///
/// Hashing type plus payload makes a resubmitted identical request
/// collapse into the original item.
pub fn derive_idempotency_key(job_type: JobType, payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(job_type.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(payload.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derived_keys_are_stable_per_payload() {
        let payload = json!({"symbol": "AAPL", "qty": "10"});
        let a = derive_idempotency_key(JobType::SubmitOrder, &payload);
        let b = derive_idempotency_key(JobType::SubmitOrder, &payload);
        assert_eq!(a, b);

        let other = derive_idempotency_key(JobType::CancelOrder, &payload);
        assert_ne!(a, other);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::DeadLetter,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("archived"), None);
    }
}
