//! Infrastructure layer: deal storage, the read-model cache, and the
//! background job ledger, each with in-memory and Postgres backends where
//! persistence applies.

pub mod cache;
pub mod deals;
pub mod jobs;
