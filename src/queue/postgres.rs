//! Postgres-backed queue.
//!
//! Idempotency rides on a partial unique index over the key while an
//! item is pending or running; claims use FOR UPDATE SKIP LOCKED so
//! concurrent workers never double-claim.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

use super::job::{derive_idempotency_key, JobOutcome, JobStatus, JobType, WorkItem};
use super::{EnqueueResult, JobStore};
use crate::error::{Result, StewardError};

pub struct PostgresJobStore {
    pool: PgPool,
    max_attempts: u32,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool, max_attempts: u32) -> Self {
        Self { pool, max_attempts }
    }

    fn item_from_row(row: &PgRow) -> Result<WorkItem> {
        let job_type_raw: String = row.try_get("job_type")?;
        let status_raw: String = row.try_get("status")?;
        let attempts: i32 = row.try_get("attempts")?;
        let max_attempts: i32 = row.try_get("max_attempts")?;

        Ok(WorkItem {
            id: row.try_get("id")?,
            job_type: JobType::parse(&job_type_raw).ok_or_else(|| {
                StewardError::Internal(format!("unknown job type in store: {}", job_type_raw))
            })?,
            status: JobStatus::parse(&status_raw).ok_or_else(|| {
                StewardError::Internal(format!("unknown job status in store: {}", status_raw))
            })?,
            attempts: attempts.max(0) as u32,
            max_attempts: max_attempts.max(0) as u32,
            next_run_at: row.try_get("next_run_at")?,
            idempotency_key: row.try_get("idempotency_key")?,
            last_error: row.try_get("last_error")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn fetch(&self, id: Uuid) -> Result<WorkItem> {
        let row = sqlx::query("SELECT * FROM work_items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StewardError::WorkItemNotFound(id))?;
        Self::item_from_row(&row)
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn enqueue(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> Result<EnqueueResult> {
        let key = idempotency_key.unwrap_or_else(|| derive_idempotency_key(job_type, &payload));

        let inserted = sqlx::query(
            r#"
            INSERT INTO work_items
                (id, job_type, status, attempts, max_attempts, next_run_at,
                 idempotency_key, payload, created_at, updated_at)
            VALUES ($1, $2, 'pending', 0, $3, now(), $4, $5, now(), now())
            ON CONFLICT (idempotency_key) WHERE status IN ('pending', 'running')
            DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_type.as_str())
        .bind(self.max_attempts as i32)
        .bind(&key)
        .bind(&payload)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(EnqueueResult::New(Self::item_from_row(&row)?));
        }

        // Conflict path: hand back the live holder of the key unchanged.
        let row = sqlx::query(
            r#"
            SELECT * FROM work_items
            WHERE idempotency_key = $1 AND status IN ('pending', 'running')
            LIMIT 1
            "#,
        )
        .bind(&key)
        .fetch_one(&self.pool)
        .await?;
        Ok(EnqueueResult::Duplicate(Self::item_from_row(&row)?))
    }

    async fn claim_next(&self, types: Option<&[JobType]>) -> Result<Option<WorkItem>> {
        let type_names: Vec<String> = types
            .map(|wanted| wanted.iter().map(|t| t.as_str().to_string()).collect())
            .unwrap_or_default();

        let row = sqlx::query(
            r#"
            UPDATE work_items
            SET status = 'running', attempts = attempts + 1, updated_at = now()
            WHERE id = (
                SELECT id FROM work_items
                WHERE status = 'pending'
                  AND next_run_at <= now()
                  AND (cardinality($1::text[]) = 0 OR job_type = ANY($1))
                ORDER BY created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(&type_names)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::item_from_row).transpose()
    }

    async fn complete(&self, id: Uuid, outcome: JobOutcome) -> Result<WorkItem> {
        let row = match outcome {
            JobOutcome::Success => {
                sqlx::query(
                    r#"
                    UPDATE work_items
                    SET status = 'succeeded', last_error = NULL, updated_at = now()
                    WHERE id = $1 AND status = 'running'
                    RETURNING *
                    "#,
                )
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
            }
            JobOutcome::Failure(error) => {
                sqlx::query(
                    r#"
                    UPDATE work_items
                    SET status = CASE
                            WHEN attempts >= max_attempts THEN 'dead_letter'
                            ELSE 'failed'
                        END,
                        last_error = $2,
                        updated_at = now()
                    WHERE id = $1 AND status = 'running'
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(error)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        match row {
            Some(row) => Self::item_from_row(&row),
            None => {
                let current = self.fetch(id).await?;
                Err(StewardError::InvalidWorkItemTransition {
                    from: current.status.to_string(),
                    to: JobStatus::Succeeded.to_string(),
                })
            }
        }
    }

    async fn requeue(&self, id: Uuid) -> Result<WorkItem> {
        let row = sqlx::query(
            r#"
            UPDATE work_items
            SET status = 'pending', attempts = 0, next_run_at = now(), updated_at = now()
            WHERE id = $1 AND status IN ('failed', 'dead_letter')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::item_from_row(&row),
            None => {
                let current = self.fetch(id).await?;
                Err(StewardError::InvalidWorkItemTransition {
                    from: current.status.to_string(),
                    to: JobStatus::Pending.to_string(),
                })
            }
        }
    }

    async fn reschedule(&self, id: Uuid, next_run_at: DateTime<Utc>) -> Result<WorkItem> {
        let row = sqlx::query(
            r#"
            UPDATE work_items
            SET status = 'pending', next_run_at = $2, updated_at = now()
            WHERE id = $1 AND status = 'failed'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(next_run_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::item_from_row(&row),
            None => {
                let current = self.fetch(id).await?;
                Err(StewardError::InvalidWorkItemTransition {
                    from: current.status.to_string(),
                    to: JobStatus::Pending.to_string(),
                })
            }
        }
    }

    async fn bury(&self, id: Uuid) -> Result<WorkItem> {
        let row = sqlx::query(
            r#"
            UPDATE work_items
            SET status = 'dead_letter', updated_at = now()
            WHERE id = $1 AND status = 'failed'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::item_from_row(&row),
            None => {
                let current = self.fetch(id).await?;
                Err(StewardError::InvalidWorkItemTransition {
                    from: current.status.to_string(),
                    to: JobStatus::DeadLetter.to_string(),
                })
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<WorkItem> {
        self.fetch(id).await
    }

    async fn failed_items(&self, limit: usize) -> Result<Vec<WorkItem>> {
        let rows = sqlx::query(
            "SELECT * FROM work_items WHERE status = 'failed' ORDER BY created_at LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::item_from_row).collect()
    }

    async fn counts(&self) -> Result<HashMap<JobStatus, u64>> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS n FROM work_items GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let status_raw: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            if let Some(status) = JobStatus::parse(&status_raw) {
                counts.insert(status, n.max(0) as u64);
            }
        }
        Ok(counts)
    }
}
