//! Deal CRUD, keyset-paginated listing, and statement submission.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use gearcrm_core::DealId;
use gearcrm_infra::cache::CacheCategory;
use gearcrm_infra::deals::{DealStage, NewDeal};
use gearcrm_infra::jobs::STATEMENT_ANALYSIS_JOB;
use gearcrm_intel::StatementInput;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_deal).get(list_deals))
        .route("/:id", get(get_deal))
        .route("/:id/stage", post(set_stage))
        .route("/:id/statements", post(submit_statement))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

pub async fn create_deal(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateDealRequest>,
) -> axum::response::Response {
    let new_deal = NewDeal {
        merchant_name: body.merchant_name,
        stage: body.stage.unwrap_or(DealStage::Lead),
        monthly_volume_cents: body.monthly_volume_cents,
        rep_id: body.rep_id,
    };

    match services.deals.insert(new_deal, Utc::now()).await {
        Ok(deal) => (StatusCode::CREATED, Json(dto::deal_to_json(deal))).into_response(),
        Err(e) => errors::deal_store_error_to_response(e),
    }
}

/// GET /deals?cursor=X&limit=20&sort=createdAt:desc&stage=lead&repId=Y
///
/// List deals as one keyset page. The cursor is an opaque token minted by a
/// previous page under the same sort; filters must also be re-sent unchanged
/// for the continuation to be consistent.
pub async fn list_deals(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::DealListQuery>,
) -> axum::response::Response {
    let request = match dto::to_page_request(query) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services.deals.page(&request).await {
        Ok(page) => Json(dto::page_to_json(page)).into_response(),
        Err(e) => errors::deal_store_error_to_response(e),
    }
}

pub async fn get_deal(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: DealId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid deal id"),
    };

    match services.deals.get(id).await {
        Ok(Some(deal)) => Json(dto::deal_to_json(deal)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("deal {id} not found")),
        Err(e) => errors::deal_store_error_to_response(e),
    }
}

pub async fn set_stage(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::SetStageRequest>,
) -> axum::response::Response {
    let id: DealId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid deal id"),
    };

    match services.deals.set_stage(id, body.stage, Utc::now()).await {
        Ok(deal) => {
            // Stage moves change the rollup; drop cached summaries so the
            // next dashboard read recomputes.
            services
                .cache
                .invalidate_category(CacheCategory::DashboardSummary);
            Json(dto::deal_to_json(deal)).into_response()
        }
        Err(e) => errors::deal_store_error_to_response(e),
    }
}

/// POST /deals/:id/statements
///
/// Queue a processing-statement analysis for the deal. Returns 202 with the
/// job id; progress is polled via `GET /jobs/:id`.
pub async fn submit_statement(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::SubmitStatementRequest>,
) -> axum::response::Response {
    let deal_id: DealId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid deal id"),
    };

    match services.deals.get(deal_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return errors::json_error(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("deal {deal_id} not found"),
            );
        }
        Err(e) => return errors::deal_store_error_to_response(e),
    }

    let input = StatementInput {
        deal_id,
        statement_text: body.statement_text,
    };
    let input = match serde_json::to_value(&input) {
        Ok(v) => v,
        Err(e) => {
            return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "serialize_error", e.to_string());
        }
    };

    match services.jobs.create(STATEMENT_ANALYSIS_JOB, input, Utc::now()).await {
        Ok(job) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "jobId": job.id.to_string(),
                "status": job.status.as_str(),
            })),
        )
            .into_response(),
        Err(e) => errors::job_store_error_to_response(e),
    }
}
