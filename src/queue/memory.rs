//! In-memory queue backend for tests and dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::job::{derive_idempotency_key, JobOutcome, JobStatus, JobType, WorkItem};
use super::{EnqueueResult, JobStore};
use crate::error::{Result, StewardError};

struct Inner {
    items: HashMap<Uuid, WorkItem>,
    // idempotency key -> item currently holding it
    key_index: HashMap<String, Uuid>,
}

pub struct MemoryJobStore {
    inner: Mutex<Inner>,
    max_attempts: u32,
}

impl MemoryJobStore {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: HashMap::new(),
                key_index: HashMap::new(),
            }),
            max_attempts,
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new(3)
    }
}

fn transition_error(item: &WorkItem, to: JobStatus) -> StewardError {
    StewardError::InvalidWorkItemTransition {
        from: item.status.to_string(),
        to: to.to_string(),
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> Result<EnqueueResult> {
        let key =
            idempotency_key.unwrap_or_else(|| derive_idempotency_key(job_type, &payload));

        let mut inner = self.inner.lock().await;

        if let Some(existing_id) = inner.key_index.get(&key).copied() {
            if let Some(existing) = inner.items.get(&existing_id) {
                if matches!(existing.status, JobStatus::Pending | JobStatus::Running) {
                    return Ok(EnqueueResult::Duplicate(existing.clone()));
                }
            }
        }

        let item = WorkItem::new(job_type, payload, Some(key.clone()), self.max_attempts);
        inner.key_index.insert(key, item.id);
        inner.items.insert(item.id, item.clone());
        Ok(EnqueueResult::New(item))
    }

    async fn claim_next(&self, types: Option<&[JobType]>) -> Result<Option<WorkItem>> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        let candidate = inner
            .items
            .values()
            .filter(|item| item.status == JobStatus::Pending && item.next_run_at <= now)
            .filter(|item| types.map_or(true, |wanted| wanted.contains(&item.job_type)))
            .min_by_key(|item| item.created_at)
            .map(|item| item.id);

        let Some(id) = candidate else {
            return Ok(None);
        };

        let item = inner
            .items
            .get_mut(&id)
            .ok_or(StewardError::WorkItemNotFound(id))?;
        item.status = JobStatus::Running;
        item.attempts += 1;
        item.updated_at = now;
        Ok(Some(item.clone()))
    }

    async fn complete(&self, id: Uuid, outcome: JobOutcome) -> Result<WorkItem> {
        let mut inner = self.inner.lock().await;
        let item = inner
            .items
            .get_mut(&id)
            .ok_or(StewardError::WorkItemNotFound(id))?;

        if item.status != JobStatus::Running {
            return Err(transition_error(item, JobStatus::Succeeded));
        }

        match outcome {
            JobOutcome::Success => {
                item.status = JobStatus::Succeeded;
                item.last_error = None;
            }
            JobOutcome::Failure(error) => {
                item.last_error = Some(error);
                item.status = if item.is_exhausted() {
                    JobStatus::DeadLetter
                } else {
                    JobStatus::Failed
                };
            }
        }
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn requeue(&self, id: Uuid) -> Result<WorkItem> {
        let mut inner = self.inner.lock().await;
        let item = inner
            .items
            .get_mut(&id)
            .ok_or(StewardError::WorkItemNotFound(id))?;

        if !matches!(item.status, JobStatus::Failed | JobStatus::DeadLetter) {
            return Err(transition_error(item, JobStatus::Pending));
        }

        item.status = JobStatus::Pending;
        item.attempts = 0;
        item.next_run_at = Utc::now();
        item.updated_at = item.next_run_at;
        Ok(item.clone())
    }

    async fn reschedule(&self, id: Uuid, next_run_at: DateTime<Utc>) -> Result<WorkItem> {
        let mut inner = self.inner.lock().await;
        let item = inner
            .items
            .get_mut(&id)
            .ok_or(StewardError::WorkItemNotFound(id))?;

        if item.status != JobStatus::Failed {
            return Err(transition_error(item, JobStatus::Pending));
        }

        item.status = JobStatus::Pending;
        item.next_run_at = next_run_at;
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn bury(&self, id: Uuid) -> Result<WorkItem> {
        let mut inner = self.inner.lock().await;
        let item = inner
            .items
            .get_mut(&id)
            .ok_or(StewardError::WorkItemNotFound(id))?;

        if item.status != JobStatus::Failed {
            return Err(transition_error(item, JobStatus::DeadLetter));
        }

        item.status = JobStatus::DeadLetter;
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn get(&self, id: Uuid) -> Result<WorkItem> {
        let inner = self.inner.lock().await;
        inner
            .items
            .get(&id)
            .cloned()
            .ok_or(StewardError::WorkItemNotFound(id))
    }

    async fn failed_items(&self, limit: usize) -> Result<Vec<WorkItem>> {
        let inner = self.inner.lock().await;
        let mut failed: Vec<WorkItem> = inner
            .items
            .values()
            .filter(|item| item.status == JobStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by_key(|item| item.created_at);
        failed.truncate(limit);
        Ok(failed)
    }

    async fn counts(&self) -> Result<HashMap<JobStatus, u64>> {
        let inner = self.inner.lock().await;
        let mut counts = HashMap::new();
        for item in inner.items.values() {
            *counts.entry(item.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn identical_payloads_collapse_into_one_item() {
        let store = MemoryJobStore::default();
        let payload = json!({"symbol": "AAPL", "qty": "5"});

        let first = store
            .enqueue(JobType::SubmitOrder, payload.clone(), None)
            .await
            .unwrap();
        let second = store
            .enqueue(JobType::SubmitOrder, payload, None)
            .await
            .unwrap();

        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_eq!(first.item().id, second.item().id);
    }

    #[tokio::test]
    async fn explicit_keys_dedupe_across_differing_payloads() {
        let store = MemoryJobStore::default();
        let first = store
            .enqueue(
                JobType::SubmitOrder,
                json!({"symbol": "AAPL"}),
                Some("order-1".into()),
            )
            .await
            .unwrap();
        let second = store
            .enqueue(
                JobType::SubmitOrder,
                json!({"symbol": "MSFT"}),
                Some("order-1".into()),
            )
            .await
            .unwrap();

        assert!(second.is_duplicate());
        // The original payload wins; the duplicate enqueue changes nothing.
        assert_eq!(second.item().payload["symbol"], "AAPL");
        assert_eq!(first.item().id, second.item().id);
    }

    #[tokio::test]
    async fn terminal_item_releases_its_key() {
        let store = MemoryJobStore::default();
        let first = store
            .enqueue(JobType::CancelOrder, json!({"id": "x"}), Some("k".into()))
            .await
            .unwrap()
            .into_item();

        let claimed = store.claim_next(None).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        store.complete(first.id, JobOutcome::Success).await.unwrap();

        let again = store
            .enqueue(JobType::CancelOrder, json!({"id": "x"}), Some("k".into()))
            .await
            .unwrap();
        assert!(!again.is_duplicate());
        assert_ne!(again.item().id, first.id);
    }

    #[tokio::test]
    async fn concurrent_claimers_never_share_an_item() {
        let store = Arc::new(MemoryJobStore::default());
        store
            .enqueue(JobType::SyncPositions, json!({}), Some("only".into()))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(
                async move { store.claim_next(None).await.unwrap() },
            ));
        }

        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn claim_respects_type_filter_and_schedule() {
        let store = MemoryJobStore::default();
        store
            .enqueue(JobType::SubmitOrder, json!({"n": 1}), Some("a".into()))
            .await
            .unwrap();
        let future = store
            .enqueue(JobType::CancelOrder, json!({"n": 2}), Some("b".into()))
            .await
            .unwrap()
            .into_item();
        store
            .reschedule_for_test(future.id, Utc::now() + chrono::Duration::hours(1))
            .await;

        let claimed = store
            .claim_next(Some(&[JobType::CancelOrder]))
            .await
            .unwrap();
        assert!(claimed.is_none());

        let claimed = store
            .claim_next(Some(&[JobType::SubmitOrder]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.job_type, JobType::SubmitOrder);
        assert_eq!(claimed.attempts, 1);
    }

    #[tokio::test]
    async fn exhausted_failures_dead_letter_and_operator_requeue_resets() {
        let store = MemoryJobStore::new(2);
        let item = store
            .enqueue(JobType::SubmitOrder, json!({}), Some("k".into()))
            .await
            .unwrap()
            .into_item();

        // First failure: retryable.
        store.claim_next(None).await.unwrap().unwrap();
        let failed = store
            .complete(item.id, JobOutcome::Failure("boom".into()))
            .await
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);

        store.reschedule(item.id, Utc::now()).await.unwrap();

        // Second failure: attempts exhausted, dead letter.
        store.claim_next(None).await.unwrap().unwrap();
        let buried = store
            .complete(item.id, JobOutcome::Failure("boom again".into()))
            .await
            .unwrap();
        assert_eq!(buried.status, JobStatus::DeadLetter);

        // Dead-lettered items stay put until an operator acts.
        assert!(store.claim_next(None).await.unwrap().is_none());

        let revived = store.requeue(item.id).await.unwrap();
        assert_eq!(revived.status, JobStatus::Pending);
        assert_eq!(revived.attempts, 0);
    }

    impl MemoryJobStore {
        async fn reschedule_for_test(&self, id: Uuid, at: DateTime<Utc>) {
            let mut inner = self.inner.lock().await;
            if let Some(item) = inner.items.get_mut(&id) {
                item.next_run_at = at;
            }
        }
    }
}
