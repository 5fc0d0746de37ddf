//! Postgres-backed deal store.
//!
//! SQL text is assembled only from the closed sort/filter enums; client
//! values always travel as bind parameters. Text keyset comparisons pin the
//! "C" collation so positions agree with the in-memory backend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::instrument;
use uuid::Uuid;

use gearcrm_core::{DealId, PageResult, SortDirection, SortValue};

use crate::deals::query::{
    DealFilter, DealPageRequest, PipelineColumn, PipelinePage, PipelineRequest,
};
use crate::deals::store::{DealStore, DealStoreError};
use crate::deals::types::{Deal, DealStage, NewDeal, StageRollup};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS deals (
        id UUID PRIMARY KEY,
        merchant_name TEXT NOT NULL,
        stage TEXT NOT NULL,
        monthly_volume_cents BIGINT NOT NULL,
        rep_id UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS deals_stage_created_idx
        ON deals (stage, created_at DESC, id DESC)",
    "CREATE INDEX IF NOT EXISTS deals_created_idx
        ON deals (created_at, id)",
];

const DEAL_COLUMNS: &str =
    "id, merchant_name, stage, monthly_volume_cents, rep_id, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgDealStore {
    pool: Arc<PgPool>,
}

impl PgDealStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create the deals table and its indexes if missing. Run once at boot.
    pub async fn ensure_schema(&self) -> Result<(), DealStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(self.pool.as_ref())
                .await
                .map_err(|e| map_sqlx_error("ensure deals schema", e))?;
        }
        Ok(())
    }
}

/// Escape LIKE metacharacters in a user-supplied needle. Postgres treats
/// backslash as the escape character by default.
fn escape_like(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn direction_sql(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DealStoreError {
    match err {
        sqlx::Error::PoolClosed => {
            DealStoreError::Storage(format!("{operation}: connection pool closed"))
        }
        sqlx::Error::PoolTimedOut => {
            DealStoreError::Storage(format!("{operation}: connection pool timed out"))
        }
        other => DealStoreError::Storage(format!("{operation}: {other}")),
    }
}

/// Raw row shape; converted into [`Deal`] after the stage string is checked.
struct DealRow {
    id: Uuid,
    merchant_name: String,
    stage: String,
    monthly_volume_cents: i64,
    rep_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, PgRow> for DealRow {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            merchant_name: row.try_get("merchant_name")?,
            stage: row.try_get("stage")?,
            monthly_volume_cents: row.try_get("monthly_volume_cents")?,
            rep_id: row.try_get("rep_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<DealRow> for Deal {
    type Error = DealStoreError;

    fn try_from(row: DealRow) -> Result<Self, Self::Error> {
        let stage = row.stage.parse::<DealStage>().map_err(|_| {
            DealStoreError::Storage(format!("unknown stage `{}` on deal {}", row.stage, row.id))
        })?;
        Ok(Deal {
            id: row.id.into(),
            merchant_name: row.merchant_name,
            stage,
            monthly_volume_cents: row.monthly_volume_cents,
            rep_id: row.rep_id.into(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &DealFilter) {
    builder.push(" AND ");
    builder.push(filter.column());
    builder.push(" ");
    builder.push(filter.op().sql());
    builder.push(" ");
    match filter {
        DealFilter::Stage(stage) => {
            builder.push_bind(stage.as_str());
        }
        DealFilter::Rep(rep) => {
            builder.push_bind(Uuid::from(*rep));
        }
        DealFilter::MinMonthlyVolume(v) | DealFilter::MaxMonthlyVolume(v) => {
            builder.push_bind(*v);
        }
        DealFilter::MerchantNameContains(needle) => {
            builder.push_bind(format!("%{}%", escape_like(needle)));
        }
    }
}

#[async_trait::async_trait]
impl DealStore for PgDealStore {
    #[instrument(skip(self, new), fields(merchant = %new.merchant_name), err)]
    async fn insert(&self, new: NewDeal, now: DateTime<Utc>) -> Result<Deal, DealStoreError> {
        new.validate()?;
        let deal = new.into_deal(now);
        sqlx::query(
            "INSERT INTO deals (id, merchant_name, stage, monthly_volume_cents, rep_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::from(deal.id))
        .bind(&deal.merchant_name)
        .bind(deal.stage.as_str())
        .bind(deal.monthly_volume_cents)
        .bind(Uuid::from(deal.rep_id))
        .bind(deal.created_at)
        .bind(deal.updated_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("insert deal", e))?;
        Ok(deal)
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: DealId) -> Result<Option<Deal>, DealStoreError> {
        let row: Option<DealRow> =
            sqlx::query_as(&format!("SELECT {DEAL_COLUMNS} FROM deals WHERE id = $1"))
                .bind(Uuid::from(id))
                .fetch_optional(self.pool.as_ref())
                .await
                .map_err(|e| map_sqlx_error("get deal", e))?;
        row.map(Deal::try_from).transpose()
    }

    #[instrument(skip(self), err)]
    async fn set_stage(
        &self,
        id: DealId,
        stage: DealStage,
        now: DateTime<Utc>,
    ) -> Result<Deal, DealStoreError> {
        let row: Option<DealRow> = sqlx::query_as(&format!(
            "UPDATE deals SET stage = $2, updated_at = $3 WHERE id = $1 RETURNING {DEAL_COLUMNS}"
        ))
        .bind(Uuid::from(id))
        .bind(stage.as_str())
        .bind(now)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("set deal stage", e))?;
        row.map(Deal::try_from)
            .transpose()?
            .ok_or(DealStoreError::NotFound(id))
    }

    #[instrument(
        skip(self, request),
        fields(
            sort_field = request.sort.field.as_str(),
            direction = request.sort.direction.as_str(),
            limit = request.limit.get(),
            filters = request.filters.len(),
        ),
        err
    )]
    async fn page(&self, request: &DealPageRequest) -> Result<PageResult<Deal>, DealStoreError> {
        request.validate()?;
        let field = request.sort.field;
        let dir = direction_sql(request.sort.direction);

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {DEAL_COLUMNS} FROM deals WHERE TRUE"
        ));
        for filter in &request.filters {
            push_filter(&mut builder, filter);
        }

        if let Some(cursor) = &request.cursor {
            // Row-constructor keyset predicate: strictly past the cursor in
            // page order, tie broken by id.
            builder.push(" AND (");
            builder.push(field.order_expr());
            builder.push(", id) ");
            builder.push(match request.sort.direction {
                SortDirection::Asc => ">",
                SortDirection::Desc => "<",
            });
            builder.push(" (");
            match &cursor.sort_value {
                SortValue::Text(s) => {
                    builder.push_bind(s.clone());
                }
                SortValue::Integer(n) => {
                    builder.push_bind(*n);
                }
                SortValue::Timestamp(ts) => {
                    builder.push_bind(*ts);
                }
            }
            builder.push(", ");
            builder.push_bind(cursor.tie_break);
            builder.push(")");
        }

        builder.push(" ORDER BY ");
        builder.push(field.order_expr());
        builder.push(" ");
        builder.push(dir);
        builder.push(", id ");
        builder.push(dir);
        builder.push(" LIMIT ");
        builder.push_bind(i64::from(request.limit.fetch_size()));

        let rows: Vec<DealRow> = builder
            .build_query_as()
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(|e| map_sqlx_error("page deals", e))?;
        let deals = rows
            .into_iter()
            .map(Deal::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PageResult::assemble(deals, request.limit, |deal| {
            request.cursor_for(deal)
        }))
    }

    #[instrument(skip(self, request), fields(per_stage = request.per_stage.get()), err)]
    async fn pipeline(&self, request: &PipelineRequest) -> Result<PipelinePage, DealStoreError> {
        let mut columns = Vec::with_capacity(DealStage::ALL.len());
        for stage in DealStage::ALL {
            let page = self.page(&request.column_request(stage)).await?;
            columns.push(PipelineColumn { stage, page });
        }
        Ok(PipelinePage { columns })
    }

    #[instrument(skip(self), err)]
    async fn stage_rollup(&self) -> Result<Vec<StageRollup>, DealStoreError> {
        // SUM over BIGINT widens to NUMERIC, hence the cast back.
        let rows = sqlx::query(
            "SELECT stage, COUNT(*) AS deals,
                    COALESCE(SUM(monthly_volume_cents), 0)::BIGINT AS monthly_volume_cents
             FROM deals GROUP BY stage",
        )
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|e| map_sqlx_error("stage rollup", e))?;

        let mut by_stage: std::collections::HashMap<DealStage, (u64, i64)> =
            std::collections::HashMap::new();
        for row in rows {
            let stage: String = row
                .try_get("stage")
                .map_err(|e| map_sqlx_error("stage rollup", e))?;
            let stage = stage.parse::<DealStage>().map_err(|_| {
                DealStoreError::Storage(format!("unknown stage `{stage}` in rollup"))
            })?;
            let deals: i64 = row
                .try_get("deals")
                .map_err(|e| map_sqlx_error("stage rollup", e))?;
            let volume: i64 = row
                .try_get("monthly_volume_cents")
                .map_err(|e| map_sqlx_error("stage rollup", e))?;
            by_stage.insert(stage, (deals as u64, volume));
        }

        Ok(DealStage::ALL
            .into_iter()
            .map(|stage| {
                let (deals, monthly_volume_cents) =
                    by_stage.get(&stage).copied().unwrap_or((0, 0));
                StageRollup {
                    stage,
                    deals,
                    monthly_volume_cents,
                }
            })
            .collect())
    }
}
