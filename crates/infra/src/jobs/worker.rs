//! Background loops: the statement-analysis worker and the orphaned-job
//! recovery sweep.

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use gearcrm_core::JobId;
use gearcrm_intel::{IntelProvider, StatementInput, TimeoutIntelProvider};

use crate::jobs::store::JobStore;
use crate::jobs::types::Job;

/// Job type handled by the statement worker.
pub const STATEMENT_ANALYSIS_JOB: &str = "statement_analysis";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to sleep when the queue is empty.
    pub poll_interval: StdDuration,
    /// Budget for a single provider call; overruns fail the job.
    pub stage_timeout: StdDuration,
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: StdDuration::from_millis(250),
            stage_timeout: StdDuration::from_secs(30),
            name: "statement-worker".to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecoverySweepConfig {
    /// Cadence of the sweep after the startup pass.
    pub interval: StdDuration,
    /// Age past which a non-terminal job counts as orphaned.
    pub threshold: Duration,
}

impl Default for RecoverySweepConfig {
    fn default() -> Self {
        Self {
            interval: StdDuration::from_secs(60),
            threshold: Duration::minutes(2),
        }
    }
}

/// Handle to a spawned background loop. The loop stops when `shutdown` is
/// called or the handle is dropped; `shutdown` additionally waits for the
/// task to finish.
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(()).await;
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

/// Start the statement-analysis worker.
///
/// The loop claims pending jobs one at a time, drains the queue, and sleeps
/// when it is empty. Handler failures land on the job as a failed state;
/// the loop itself never exits on error.
pub fn spawn_statement_worker<S, P>(store: S, provider: P, config: WorkerConfig) -> WorkerHandle
where
    S: JobStore + 'static,
    P: IntelProvider,
{
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let provider = TimeoutIntelProvider::new(provider, config.stage_timeout);

    let join = tokio::spawn(async move {
        info!(worker = %config.name, "statement worker started");
        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(mpsc::error::TryRecvError::Disconnected) => break,
                Err(mpsc::error::TryRecvError::Empty) => {}
            }
            match claim_one(&store).await {
                Some(job) => process_statement_job(&store, &provider, job).await,
                None => {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(config.poll_interval) => {}
                    }
                }
            }
        }
        info!(worker = %config.name, "statement worker stopped");
    });

    WorkerHandle {
        shutdown: shutdown_tx,
        join: Some(join),
    }
}

async fn claim_one<S: JobStore>(store: &S) -> Option<Job> {
    match store.claim_next(STATEMENT_ANALYSIS_JOB, Utc::now()).await {
        Ok(job) => job,
        Err(e) => {
            error!(error = %e, "failed to poll for pending jobs");
            None
        }
    }
}

async fn process_statement_job<S, P>(store: &S, provider: &TimeoutIntelProvider<P>, job: Job)
where
    S: JobStore,
    P: IntelProvider,
{
    debug!(job_id = %job.id, "processing statement analysis");

    let input: StatementInput = match serde_json::from_value(job.input.clone()) {
        Ok(input) => input,
        Err(e) => {
            finish_failed(store, job.id, &format!("malformed job input: {e}")).await;
            return;
        }
    };

    match provider.analyze_statement(&input).await {
        Ok(analysis) => match serde_json::to_value(&analysis) {
            Ok(result) => {
                if let Err(e) = store.complete(job.id, result, Utc::now()).await {
                    error!(job_id = %job.id, error = %e, "could not record job completion");
                }
            }
            Err(e) => {
                finish_failed(store, job.id, &format!("unserializable result: {e}")).await;
            }
        },
        Err(e) => finish_failed(store, job.id, &e.to_string()).await,
    }
}

async fn finish_failed<S: JobStore>(store: &S, id: JobId, message: &str) {
    if let Err(e) = store.fail(id, message, Utc::now()).await {
        error!(job_id = %id, error = %e, "could not record job failure");
    }
}

/// Start the recovery sweep.
///
/// Runs once immediately so jobs stranded by a crash or restart are
/// force-failed as soon as the process is back, then on the configured
/// interval for anything that goes stale while running.
pub fn spawn_recovery_sweep<S>(store: S, config: RecoverySweepConfig) -> WorkerHandle
where
    S: JobStore + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let join = tokio::spawn(async move {
        info!(threshold_secs = config.threshold.num_seconds(), "job recovery sweep started");
        loop {
            sweep_once(&store, config.threshold).await;
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(config.interval) => {}
            }
        }
        info!("job recovery sweep stopped");
    });

    WorkerHandle {
        shutdown: shutdown_tx,
        join: Some(join),
    }
}

async fn sweep_once<S: JobStore>(store: &S, threshold: Duration) {
    match store.recover_stale(threshold, Utc::now()).await {
        Ok(swept) if !swept.is_empty() => {
            warn!(count = swept.len(), "force-failed orphaned jobs");
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "recovery sweep failed"),
    }
}
