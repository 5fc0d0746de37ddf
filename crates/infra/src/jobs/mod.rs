//! Background job ledger.
//!
//! ## Design
//!
//! - Every submission is recorded before any work starts, so clients can
//!   always poll the outcome
//! - Claiming is an atomic conditional transition; losers get a typed error
//! - Non-terminal jobs older than a threshold are force-failed by the
//!   recovery sweep, at startup and on an interval
//!
//! ## Components
//!
//! - `Job`, `JobStatus`: the ledger rows and their lifecycle
//! - `JobStore`: persistence with the claim protocol (in-memory and Postgres)
//! - `spawn_statement_worker` / `spawn_recovery_sweep`: the background loops

pub mod postgres;
pub mod store;
pub mod types;
pub mod worker;

pub use postgres::PgJobStore;
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError, ORPHAN_MESSAGE};
pub use types::{Job, JobStatus};
pub use worker::{
    spawn_recovery_sweep, spawn_statement_worker, RecoverySweepConfig, WorkerConfig, WorkerHandle,
    STATEMENT_ANALYSIS_JOB,
};
