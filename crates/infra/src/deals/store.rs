//! Storage interface for deals.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use gearcrm_core::{DealId, DomainError, PageResult};

use crate::deals::query::{DealPageRequest, PipelinePage, PipelineRequest};
use crate::deals::types::{Deal, DealStage, NewDeal, StageRollup};

/// Errors surfaced by deal storage.
#[derive(Debug, Error)]
pub enum DealStoreError {
    #[error("deal not found: {0}")]
    NotFound(DealId),

    /// Invalid input or an inconsistent page request.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The backing store failed; retryable from the caller's point of view.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Persistence boundary for deals. Implemented in memory for tests and small
/// deployments and on Postgres for production.
///
/// Both `page` variants promise the same contract: rows ordered by
/// `(sort field, id)`, pages resumable via the returned cursor with no row
/// skipped or repeated while paging, and `next_cursor` present exactly when
/// `has_more` is true.
#[async_trait::async_trait]
pub trait DealStore: Send + Sync {
    async fn insert(&self, new: NewDeal, now: DateTime<Utc>) -> Result<Deal, DealStoreError>;

    async fn get(&self, id: DealId) -> Result<Option<Deal>, DealStoreError>;

    /// Move a deal to `stage`, refreshing `updated_at`.
    async fn set_stage(
        &self,
        id: DealId,
        stage: DealStage,
        now: DateTime<Utc>,
    ) -> Result<Deal, DealStoreError>;

    /// One keyset page of the filtered, sorted deal list.
    async fn page(&self, request: &DealPageRequest) -> Result<PageResult<Deal>, DealStoreError>;

    /// The pipeline board: every stage paged independently under the same
    /// per-stage budget.
    async fn pipeline(&self, request: &PipelineRequest) -> Result<PipelinePage, DealStoreError>;

    /// Deal count and volume per stage, zero-filled for empty stages.
    async fn stage_rollup(&self) -> Result<Vec<StageRollup>, DealStoreError>;
}

#[async_trait::async_trait]
impl<S> DealStore for Arc<S>
where
    S: DealStore + ?Sized,
{
    async fn insert(&self, new: NewDeal, now: DateTime<Utc>) -> Result<Deal, DealStoreError> {
        (**self).insert(new, now).await
    }

    async fn get(&self, id: DealId) -> Result<Option<Deal>, DealStoreError> {
        (**self).get(id).await
    }

    async fn set_stage(
        &self,
        id: DealId,
        stage: DealStage,
        now: DateTime<Utc>,
    ) -> Result<Deal, DealStoreError> {
        (**self).set_stage(id, stage, now).await
    }

    async fn page(&self, request: &DealPageRequest) -> Result<PageResult<Deal>, DealStoreError> {
        (**self).page(request).await
    }

    async fn pipeline(&self, request: &PipelineRequest) -> Result<PipelinePage, DealStoreError> {
        (**self).pipeline(request).await
    }

    async fn stage_rollup(&self) -> Result<Vec<StageRollup>, DealStoreError> {
        (**self).stage_rollup().await
    }
}
