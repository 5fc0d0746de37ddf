//! In-memory deal store.
//!
//! Reference implementation of the keyset paging contract; the Postgres
//! backend must stay observably equivalent to this one. Backs tests and
//! single-process deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use gearcrm_core::{Cursor, DealId, PageResult, SortDirection};

use crate::deals::query::{
    compare_deals, DealPageRequest, DealSortField, PipelineColumn, PipelinePage, PipelineRequest,
};
use crate::deals::store::{DealStore, DealStoreError};
use crate::deals::types::{Deal, DealStage, NewDeal, StageRollup};

#[derive(Debug, Default)]
pub struct InMemoryDealStore {
    deals: RwLock<HashMap<DealId, Deal>>,
}

impl InMemoryDealStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Whether `deal` sits strictly past the cursor position in page order.
///
/// Ascending pages resume at `(sort value, id) > cursor`; descending pages
/// flip the comparison. Rows equal to the cursor are excluded so the row the
/// cursor was minted from is never repeated.
fn beyond_cursor(deal: &Deal, cursor: &Cursor, field: DealSortField) -> bool {
    let ord = deal
        .sort_value(field)
        .compare(&cursor.sort_value)
        .unwrap_or(core::cmp::Ordering::Equal)
        .then_with(|| Uuid::from(deal.id).cmp(&cursor.tie_break));
    match cursor.direction {
        SortDirection::Asc => ord == core::cmp::Ordering::Greater,
        SortDirection::Desc => ord == core::cmp::Ordering::Less,
    }
}

#[async_trait::async_trait]
impl DealStore for InMemoryDealStore {
    async fn insert(&self, new: NewDeal, now: DateTime<Utc>) -> Result<Deal, DealStoreError> {
        new.validate()?;
        let deal = new.into_deal(now);
        self.deals.write().unwrap().insert(deal.id, deal.clone());
        Ok(deal)
    }

    async fn get(&self, id: DealId) -> Result<Option<Deal>, DealStoreError> {
        Ok(self.deals.read().unwrap().get(&id).cloned())
    }

    async fn set_stage(
        &self,
        id: DealId,
        stage: DealStage,
        now: DateTime<Utc>,
    ) -> Result<Deal, DealStoreError> {
        let mut deals = self.deals.write().unwrap();
        let deal = deals.get_mut(&id).ok_or(DealStoreError::NotFound(id))?;
        deal.stage = stage;
        // Same microsecond resolution timestamptz would store.
        deal.updated_at = now.trunc_subsecs(6);
        Ok(deal.clone())
    }

    async fn page(&self, request: &DealPageRequest) -> Result<PageResult<Deal>, DealStoreError> {
        request.validate()?;

        // Linear scan; fine at in-memory scale.
        let mut rows: Vec<Deal> = {
            let deals = self.deals.read().unwrap();
            deals
                .values()
                .filter(|deal| request.filters.iter().all(|f| f.matches(deal)))
                .cloned()
                .collect()
        };

        let field = request.sort.field;
        rows.sort_by(|a, b| {
            let ord = compare_deals(a, b, field);
            match request.sort.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });

        if let Some(cursor) = &request.cursor {
            rows.retain(|deal| beyond_cursor(deal, cursor, field));
        }
        rows.truncate(request.limit.fetch_size() as usize);

        Ok(PageResult::assemble(rows, request.limit, |deal| {
            request.cursor_for(deal)
        }))
    }

    async fn pipeline(&self, request: &PipelineRequest) -> Result<PipelinePage, DealStoreError> {
        let mut columns = Vec::with_capacity(DealStage::ALL.len());
        for stage in DealStage::ALL {
            let page = self.page(&request.column_request(stage)).await?;
            columns.push(PipelineColumn { stage, page });
        }
        Ok(PipelinePage { columns })
    }

    async fn stage_rollup(&self) -> Result<Vec<StageRollup>, DealStoreError> {
        let deals = self.deals.read().unwrap();
        let mut tally: HashMap<DealStage, (u64, i64)> = HashMap::new();
        for deal in deals.values() {
            let entry = tally.entry(deal.stage).or_default();
            entry.0 += 1;
            entry.1 += deal.monthly_volume_cents;
        }
        Ok(DealStage::ALL
            .into_iter()
            .map(|stage| {
                let (deals, monthly_volume_cents) = tally.get(&stage).copied().unwrap_or((0, 0));
                StageRollup {
                    stage,
                    deals,
                    monthly_volume_cents,
                }
            })
            .collect())
    }
}
