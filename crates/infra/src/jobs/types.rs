//! Job records and their lifecycle.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use gearcrm_core::{DomainError, JobId};

/// Lifecycle state of a background job.
///
/// Legal transitions: pending -> processing -> completed | failed, plus
/// pending -> failed for jobs rejected or swept before a worker claims them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::validation(format!(
                "unknown job status: `{other}`"
            ))),
        }
    }
}

/// A unit of background work tracked from submission to a terminal state.
///
/// The record outlives the work so clients can poll it; `result` and
/// `error_message` carry the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub input: serde_json::Value,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl Job {
    /// Timestamps are stored at microsecond resolution, matching timestamptz.
    pub fn new(job_type: impl Into<String>, input: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            input,
            status: JobStatus::Pending,
            created_at: now.trunc_subsecs(6),
            started_at: None,
            completed_at: None,
            error_message: None,
            result: None,
        }
    }

    // Transition legality is enforced by the stores; these only record the
    // state change.

    pub(crate) fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.started_at = Some(now.trunc_subsecs(6));
    }

    pub(crate) fn mark_completed(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(now.trunc_subsecs(6));
        self.result = Some(result);
    }

    pub(crate) fn mark_failed(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(now.trunc_subsecs(6));
        self.error_message = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_jobs_are_pending_with_no_outcome() {
        let now = Utc::now();
        let job = Job::new("statement_analysis", json!({"deal": 1}), now);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.created_at, now);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
        assert!(job.error_message.is_none());
        assert!(job.result.is_none());
    }

    #[test]
    fn lifecycle_marks_record_timestamps_and_outcome() {
        let created = Utc::now();
        let mut job = Job::new("statement_analysis", json!({}), created);

        let started = created + chrono::Duration::seconds(1);
        job.mark_processing(started);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.started_at, Some(started));

        let finished = started + chrono::Duration::seconds(5);
        job.mark_completed(json!({"savings": 120}), finished);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed_at, Some(finished));
        assert_eq!(job.result, Some(json!({"savings": 120})));
        assert!(job.error_message.is_none());
    }

    #[test]
    fn failed_jobs_keep_the_message() {
        let now = Utc::now();
        let mut job = Job::new("statement_analysis", json!({}), now);
        job.mark_failed("could not parse statement", now);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_message.as_deref(),
            Some("could not parse statement")
        );
    }

    #[test]
    fn terminal_states_are_exactly_completed_and_failed() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("paused".parse::<JobStatus>().is_err());
    }
}
