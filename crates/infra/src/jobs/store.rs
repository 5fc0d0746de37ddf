//! Job persistence and the claim protocol.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use gearcrm_core::JobId;

use crate::jobs::types::{Job, JobStatus};

/// Failure message stamped on jobs force-failed by the recovery sweep.
pub const ORPHAN_MESSAGE: &str = "interrupted by server restart - please retry";

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The claim lost the race; the job had already left `pending`.
    #[error("job {id} already claimed (status: {status})")]
    AlreadyClaimed { id: JobId, status: JobStatus },

    /// A completion or failure arrived for a job not in the required state.
    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

/// Queue-depth snapshot for the jobs stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Persistence boundary for jobs.
///
/// `claim` is the concurrency point: it must atomically move exactly one
/// `pending` job to `processing`, and every losing contender must see
/// [`JobStoreError::AlreadyClaimed`]. All transitions take the caller's
/// clock so staleness is testable.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Record a new pending job.
    async fn create(
        &self,
        job_type: &str,
        input: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError>;

    async fn get(&self, id: JobId) -> Result<Job, JobStoreError>;

    /// Atomically take a specific pending job for processing.
    async fn claim(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, JobStoreError>;

    /// Atomically take the oldest pending job of `job_type`, if any.
    async fn claim_next(
        &self,
        job_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError>;

    /// Move a processing job to `completed` with its result.
    async fn complete(
        &self,
        id: JobId,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError>;

    /// Move a pending or processing job to `failed`.
    async fn fail(
        &self,
        id: JobId,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError>;

    /// Force-fail every non-terminal job older than `threshold`, stamping
    /// [`ORPHAN_MESSAGE`]. Age is measured from `started_at` for processing
    /// jobs and `created_at` for pending ones. Returns the ids swept.
    async fn recover_stale(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, JobStoreError>;

    async fn stats(&self) -> Result<JobStats, JobStoreError>;
}

#[async_trait::async_trait]
impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    async fn create(
        &self,
        job_type: &str,
        input: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        (**self).create(job_type, input, now).await
    }

    async fn get(&self, id: JobId) -> Result<Job, JobStoreError> {
        (**self).get(id).await
    }

    async fn claim(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, JobStoreError> {
        (**self).claim(id, now).await
    }

    async fn claim_next(
        &self,
        job_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next(job_type, now).await
    }

    async fn complete(
        &self,
        id: JobId,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        (**self).complete(id, result, now).await
    }

    async fn fail(
        &self,
        id: JobId,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        (**self).fail(id, error_message, now).await
    }

    async fn recover_stale(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, JobStoreError> {
        (**self).recover_stale(threshold, now).await
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats().await
    }
}

/// In-memory job store. The claim check-and-set runs under one write lock,
/// which gives the same atomicity the SQL backend gets from a conditional
/// UPDATE.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(
        &self,
        job_type: &str,
        input: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        let job = Job::new(job_type, input, now);
        self.jobs.write().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job, JobStoreError> {
        self.jobs
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(JobStoreError::NotFound(id))
    }

    async fn claim(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        if job.status != JobStatus::Pending {
            return Err(JobStoreError::AlreadyClaimed {
                id,
                status: job.status,
            });
        }
        job.mark_processing(now);
        Ok(job.clone())
    }

    async fn claim_next(
        &self,
        job_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let next = jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending && job.job_type == job_type)
            .map(|job| (job.created_at, job.id))
            .min();
        match next {
            Some((_, id)) => {
                let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
                job.mark_processing(now);
                Ok(Some(job.clone()))
            }
            None => Ok(None),
        }
    }

    async fn complete(
        &self,
        id: JobId,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        if job.status != JobStatus::Processing {
            return Err(JobStoreError::InvalidTransition {
                id,
                from: job.status,
                to: JobStatus::Completed,
            });
        }
        job.mark_completed(result, now);
        Ok(job.clone())
    }

    async fn fail(
        &self,
        id: JobId,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        if job.status.is_terminal() {
            return Err(JobStoreError::InvalidTransition {
                id,
                from: job.status,
                to: JobStatus::Failed,
            });
        }
        job.mark_failed(error_message, now);
        Ok(job.clone())
    }

    async fn recover_stale(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, JobStoreError> {
        let cutoff = now - threshold;
        let mut jobs = self.jobs.write().unwrap();
        let mut swept = Vec::new();
        for job in jobs.values_mut() {
            let anchored_at = match job.status {
                JobStatus::Pending => job.created_at,
                JobStatus::Processing => job.started_at.unwrap_or(job.created_at),
                JobStatus::Completed | JobStatus::Failed => continue,
            };
            if anchored_at < cutoff {
                job.mark_failed(ORPHAN_MESSAGE, now);
                swept.push(job.id);
            }
        }
        swept.sort();
        Ok(swept)
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut stats = JobStats::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
