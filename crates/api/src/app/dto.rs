use axum::http::StatusCode;
use serde::Deserialize;

use gearcrm_core::{Cursor, PageLimit, PageResult, RepId, SortValueKind};
use gearcrm_infra::cache::CacheStatus;
use gearcrm_infra::deals::{
    Deal, DealFilter, DealPageRequest, DealSort, DealStage, PipelinePage, PipelineRequest,
    StageRollup,
};
use gearcrm_infra::jobs::Job;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDealRequest {
    pub merchant_name: String,
    pub stage: Option<DealStage>,
    pub monthly_volume_cents: i64,
    pub rep_id: RepId,
}

#[derive(Debug, Deserialize)]
pub struct SetStageRequest {
    pub stage: DealStage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitStatementRequest {
    pub statement_text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealListQuery {
    pub cursor: Option<String>,
    pub limit: Option<u32>,
    /// `field` or `field:asc` / `field:desc`.
    pub sort: Option<String>,
    pub stage: Option<String>,
    pub rep_id: Option<String>,
    pub min_monthly_volume_cents: Option<i64>,
    pub max_monthly_volume_cents: Option<i64>,
    /// Case-insensitive merchant name fragment.
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineQuery {
    pub per_stage: Option<u32>,
    pub rep_id: Option<String>,
    pub cursor_lead: Option<String>,
    pub cursor_contacted: Option<String>,
    pub cursor_quoted: Option<String>,
    pub cursor_signed: Option<String>,
    pub cursor_installed: Option<String>,
}

// -------------------------
// Request assembly
// -------------------------

/// Build a validated page request from raw query parameters.
///
/// The sort is resolved first so the cursor can be decoded against the sort
/// field's value kind; a token minted under a different sort is rejected here
/// with a 400 rather than surfacing as a garbage page.
pub fn to_page_request(query: DealListQuery) -> Result<DealPageRequest, axum::response::Response> {
    let sort = match query.sort.as_deref() {
        Some(spec) => DealSort::parse(spec).map_err(errors::domain_error_to_response)?,
        None => DealSort::default(),
    };

    let cursor = match query.cursor.as_deref() {
        Some(token) => Some(
            Cursor::decode_for(token, sort.field.kind()).map_err(errors::cursor_error_to_response)?,
        ),
        None => None,
    };

    let mut filters = Vec::new();
    if let Some(stage) = query.stage.as_deref() {
        filters.push(DealFilter::Stage(errors::parse_stage(stage)?));
    }
    if let Some(rep) = query.rep_id.as_deref() {
        filters.push(DealFilter::Rep(parse_rep_id(rep)?));
    }
    if let Some(min) = query.min_monthly_volume_cents {
        filters.push(DealFilter::MinMonthlyVolume(min));
    }
    if let Some(max) = query.max_monthly_volume_cents {
        filters.push(DealFilter::MaxMonthlyVolume(max));
    }
    if let Some(needle) = query.search {
        filters.push(DealFilter::MerchantNameContains(needle));
    }

    Ok(DealPageRequest {
        limit: PageLimit::new(query.limit),
        cursor,
        sort,
        filters,
    })
}

/// Build a pipeline request; each stage cursor decodes independently, so one
/// bad column token fails the whole call rather than silently resetting a
/// column to its first page.
pub fn to_pipeline_request(query: PipelineQuery) -> Result<PipelineRequest, axum::response::Response> {
    let rep = match query.rep_id.as_deref() {
        Some(raw) => Some(parse_rep_id(raw)?),
        None => None,
    };

    let mut cursors = std::collections::HashMap::new();
    let stage_cursors = [
        (DealStage::Lead, query.cursor_lead),
        (DealStage::Contacted, query.cursor_contacted),
        (DealStage::Quoted, query.cursor_quoted),
        (DealStage::Signed, query.cursor_signed),
        (DealStage::Installed, query.cursor_installed),
    ];
    for (stage, token) in stage_cursors {
        if let Some(token) = token {
            // Pipeline columns always page by creation time.
            let cursor = Cursor::decode_for(&token, SortValueKind::Timestamp)
                .map_err(errors::cursor_error_to_response)?;
            cursors.insert(stage, cursor);
        }
    }

    Ok(PipelineRequest {
        per_stage: PageLimit::new(query.per_stage),
        cursors,
        rep,
    })
}

pub fn parse_rep_id(s: &str) -> Result<RepId, axum::response::Response> {
    s.parse::<RepId>().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "repId must be a UUID")
    })
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn deal_to_json(deal: Deal) -> serde_json::Value {
    serde_json::json!({
        "id": deal.id.to_string(),
        "merchantName": deal.merchant_name,
        "stage": deal.stage.as_str(),
        "monthlyVolumeCents": deal.monthly_volume_cents,
        "repId": deal.rep_id.to_string(),
        "createdAt": deal.created_at.to_rfc3339(),
        "updatedAt": deal.updated_at.to_rfc3339(),
    })
}

pub fn page_to_json(page: PageResult<Deal>) -> serde_json::Value {
    serde_json::json!({
        "items": page.items.into_iter().map(deal_to_json).collect::<Vec<_>>(),
        "nextCursor": page.next_cursor,
        "hasMore": page.has_more,
    })
}

pub fn pipeline_to_json(page: PipelinePage) -> serde_json::Value {
    serde_json::json!({
        "columns": page.columns.into_iter().map(|col| serde_json::json!({
            "stage": col.stage.as_str(),
            "items": col.page.items.into_iter().map(deal_to_json).collect::<Vec<_>>(),
            "nextCursor": col.page.next_cursor,
            "hasMore": col.page.has_more,
        })).collect::<Vec<_>>()
    })
}

pub fn rollup_to_json(rows: Vec<StageRollup>) -> serde_json::Value {
    serde_json::Value::Array(
        rows.into_iter()
            .map(|row| {
                serde_json::json!({
                    "stage": row.stage.as_str(),
                    "deals": row.deals,
                    "monthlyVolumeCents": row.monthly_volume_cents,
                })
            })
            .collect(),
    )
}

pub fn job_to_json(job: Job) -> serde_json::Value {
    serde_json::json!({
        "jobId": job.id.to_string(),
        "jobType": job.job_type,
        "status": job.status.as_str(),
        "createdAt": job.created_at.to_rfc3339(),
        "startedAt": job.started_at.map(|t| t.to_rfc3339()),
        "completedAt": job.completed_at.map(|t| t.to_rfc3339()),
        "error": job.error_message,
        "result": job.result,
    })
}

pub fn cache_status_to_json(status: CacheStatus) -> serde_json::Value {
    serde_json::json!({
        "cachedAt": status.cached_at.map(|t| t.to_rfc3339()),
        "expiresAt": status.expires_at.map(|t| t.to_rfc3339()),
        "isStale": status.is_stale,
    })
}
