//! Postgres-backed job store.
//!
//! State transitions are single conditional UPDATEs; the WHERE clause
//! carries the legality check so two workers can never both win a claim.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use gearcrm_core::JobId;

use crate::jobs::store::{JobStats, JobStore, JobStoreError, ORPHAN_MESSAGE};
use crate::jobs::types::{Job, JobStatus};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS jobs (
        id UUID PRIMARY KEY,
        job_type TEXT NOT NULL,
        input JSONB NOT NULL,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        error_message TEXT,
        result JSONB
    )",
    "CREATE INDEX IF NOT EXISTS jobs_status_type_idx
        ON jobs (status, job_type, created_at)",
];

const JOB_COLUMNS: &str =
    "id, job_type, input, status, created_at, started_at, completed_at, error_message, result";

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: Arc<PgPool>,
}

impl PgJobStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(self.pool.as_ref())
                .await
                .map_err(|e| map_sqlx_error("ensure jobs schema", e))?;
        }
        Ok(())
    }

    /// Status of a job after a conditional transition matched no row, to
    /// tell "no such job" apart from "job was in the wrong state".
    async fn current_status(&self, id: JobId) -> Result<Option<JobStatus>, JobStoreError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(|e| map_sqlx_error("read job status", e))?;
        status
            .map(|s| {
                s.parse::<JobStatus>().map_err(|_| {
                    JobStoreError::Storage(format!("unknown status `{s}` on job {id}"))
                })
            })
            .transpose()
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("{operation}: connection pool closed"))
        }
        sqlx::Error::PoolTimedOut => {
            JobStoreError::Storage(format!("{operation}: connection pool timed out"))
        }
        other => JobStoreError::Storage(format!("{operation}: {other}")),
    }
}

struct JobRow {
    id: Uuid,
    job_type: String,
    input: serde_json::Value,
    status: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    result: Option<serde_json::Value>,
}

impl sqlx::FromRow<'_, PgRow> for JobRow {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            job_type: row.try_get("job_type")?,
            input: row.try_get("input")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error_message: row.try_get("error_message")?,
            result: row.try_get("result")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<JobStatus>().map_err(|_| {
            JobStoreError::Storage(format!("unknown status `{}` on job {}", row.status, row.id))
        })?;
        Ok(Job {
            id: row.id.into(),
            job_type: row.job_type,
            input: row.input,
            status,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            result: row.result,
        })
    }
}

#[async_trait::async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, input), err)]
    async fn create(
        &self,
        job_type: &str,
        input: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        let job = Job::new(job_type, input, now);
        sqlx::query(
            "INSERT INTO jobs (id, job_type, input, status, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::from(job.id))
        .bind(&job.job_type)
        .bind(&job.input)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("create job", e))?;
        Ok(job)
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: JobId) -> Result<Job, JobStoreError> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
                .bind(Uuid::from(id))
                .fetch_optional(self.pool.as_ref())
                .await
                .map_err(|e| map_sqlx_error("get job", e))?;
        row.map(Job::try_from)
            .transpose()?
            .ok_or(JobStoreError::NotFound(id))
    }

    #[instrument(skip(self), err)]
    async fn claim(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, JobStoreError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs SET status = 'processing', started_at = $2
             WHERE id = $1 AND status = 'pending'
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Uuid::from(id))
        .bind(now)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("claim job", e))?;

        match row {
            Some(row) => Job::try_from(row),
            None => match self.current_status(id).await? {
                Some(status) => Err(JobStoreError::AlreadyClaimed { id, status }),
                None => Err(JobStoreError::NotFound(id)),
            },
        }
    }

    #[instrument(skip(self), err)]
    async fn claim_next(
        &self,
        job_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError> {
        // SKIP LOCKED keeps concurrent workers from queueing on the same
        // candidate row.
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs SET status = 'processing', started_at = $2
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE status = 'pending' AND job_type = $1
                 ORDER BY created_at, id
                 FOR UPDATE SKIP LOCKED
                 LIMIT 1
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_type)
        .bind(now)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("claim next job", e))?;
        row.map(Job::try_from).transpose()
    }

    #[instrument(skip(self, result), err)]
    async fn complete(
        &self,
        id: JobId,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs SET status = 'completed', completed_at = $2, result = $3
             WHERE id = $1 AND status = 'processing'
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Uuid::from(id))
        .bind(now)
        .bind(&result)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("complete job", e))?;

        match row {
            Some(row) => Job::try_from(row),
            None => match self.current_status(id).await? {
                Some(from) => Err(JobStoreError::InvalidTransition {
                    id,
                    from,
                    to: JobStatus::Completed,
                }),
                None => Err(JobStoreError::NotFound(id)),
            },
        }
    }

    #[instrument(skip(self, error_message), err)]
    async fn fail(
        &self,
        id: JobId,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs SET status = 'failed', completed_at = $2, error_message = $3
             WHERE id = $1 AND status IN ('pending', 'processing')
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Uuid::from(id))
        .bind(now)
        .bind(error_message)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("fail job", e))?;

        match row {
            Some(row) => Job::try_from(row),
            None => match self.current_status(id).await? {
                Some(from) => Err(JobStoreError::InvalidTransition {
                    id,
                    from,
                    to: JobStatus::Failed,
                }),
                None => Err(JobStoreError::NotFound(id)),
            },
        }
    }

    #[instrument(skip(self), err)]
    async fn recover_stale(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, JobStoreError> {
        let cutoff = now - threshold;
        let rows = sqlx::query(
            "UPDATE jobs SET status = 'failed', completed_at = $1, error_message = $2
             WHERE (status = 'pending' AND created_at < $3)
                OR (status = 'processing' AND started_at < $3)
             RETURNING id",
        )
        .bind(now)
        .bind(ORPHAN_MESSAGE)
        .bind(cutoff)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("recover stale jobs", e))?;

        let mut swept = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row
                .try_get("id")
                .map_err(|e| map_sqlx_error("recover stale jobs", e))?;
            swept.push(JobId::from(id));
        }
        swept.sort();
        Ok(swept)
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS jobs FROM jobs GROUP BY status")
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(|e| map_sqlx_error("job stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| map_sqlx_error("job stats", e))?;
            let count: i64 = row
                .try_get("jobs")
                .map_err(|e| map_sqlx_error("job stats", e))?;
            match status.parse::<JobStatus>() {
                Ok(JobStatus::Pending) => stats.pending = count as u64,
                Ok(JobStatus::Processing) => stats.processing = count as u64,
                Ok(JobStatus::Completed) => stats.completed = count as u64,
                Ok(JobStatus::Failed) => stats.failed = count as u64,
                Err(_) => {
                    return Err(JobStoreError::Storage(format!(
                        "unknown status `{status}` in stats"
                    )))
                }
            }
        }
        Ok(stats)
    }
}
