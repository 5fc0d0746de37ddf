//! Cache-fronted merchant intel endpoints.
//!
//! Reports are expensive to produce, so reads go through the tiered cache
//! under the merchant-intel category. When the provider is down, the read
//! path degrades to the last good report and says so; an explicit refresh
//! never does.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use gearcrm_core::DealId;
use gearcrm_infra::cache::CacheCategory;
use gearcrm_infra::deals::Deal;
use gearcrm_intel::MerchantReportRequest;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/:id/intel", get(get_intel))
        .route("/:id/intel/refresh", post(refresh_intel))
        .route("/:id/intel/cache-status", get(intel_cache_status))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /deals/:id/intel
///
/// Serve the merchant report, computing and caching it on a miss. A provider
/// failure falls back to the previous report when one is still around, with
/// `isStale: true` so clients can badge it.
pub async fn get_intel(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let deal = match load_deal(&services, &id).await {
        Ok(deal) => deal,
        Err(resp) => return resp,
    };

    let key = CacheCategory::MerchantIntel.key(&deal.id.to_string());
    let request = report_request(&deal);
    let provider = services.intel.clone();
    let now = Utc::now();

    let computed = services
        .cache
        .get_or_compute(&key, CacheCategory::MerchantIntel, now, || async move {
            match provider.merchant_report(&request).await {
                Ok(report) => serde_json::to_value(&report).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        })
        .await;

    match computed {
        Ok(report) => {
            let status = services.cache.status(&key, now);
            Json(serde_json::json!({
                "report": report,
                "cachedAt": status.cached_at.map(|t| t.to_rfc3339()),
                "isStale": false,
            }))
            .into_response()
        }
        Err(err) => match services.cache.get_stale(&key) {
            Some((report, computed_at)) => Json(serde_json::json!({
                "report": report,
                "cachedAt": computed_at.to_rfc3339(),
                "isStale": true,
            }))
            .into_response(),
            None => errors::cache_error_to_response(err),
        },
    }
}

/// POST /deals/:id/intel/refresh
///
/// Drop the cached report and recompute. The caller asked for fresh data, so
/// a provider failure surfaces as 502 instead of serving the old report.
pub async fn refresh_intel(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let deal = match load_deal(&services, &id).await {
        Ok(deal) => deal,
        Err(resp) => return resp,
    };

    let key = CacheCategory::MerchantIntel.key(&deal.id.to_string());
    services.cache.invalidate(&key);

    let request = report_request(&deal);
    let provider = services.intel.clone();
    let now = Utc::now();

    let computed = services
        .cache
        .get_or_compute(&key, CacheCategory::MerchantIntel, now, || async move {
            match provider.merchant_report(&request).await {
                Ok(report) => serde_json::to_value(&report).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        })
        .await;

    match computed {
        Ok(report) => {
            let status = services.cache.status(&key, now);
            Json(serde_json::json!({
                "report": report,
                "cachedAt": status.cached_at.map(|t| t.to_rfc3339()),
                "isStale": false,
            }))
            .into_response()
        }
        Err(err) => errors::cache_error_to_response(err),
    }
}

/// GET /deals/:id/intel/cache-status
///
/// Describe the cache slot for this deal's report. An absent entry reads as
/// stale with no timestamps.
pub async fn intel_cache_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let deal_id: DealId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid deal id"),
    };

    let key = CacheCategory::MerchantIntel.key(&deal_id.to_string());
    let status = services.cache.status(&key, Utc::now());
    Json(dto::cache_status_to_json(status)).into_response()
}

async fn load_deal(services: &AppServices, raw_id: &str) -> Result<Deal, axum::response::Response> {
    let deal_id: DealId = raw_id.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid deal id")
    })?;

    match services.deals.get(deal_id).await {
        Ok(Some(deal)) => Ok(deal),
        Ok(None) => Err(errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("deal {deal_id} not found"),
        )),
        Err(e) => Err(errors::deal_store_error_to_response(e)),
    }
}

fn report_request(deal: &Deal) -> MerchantReportRequest {
    MerchantReportRequest {
        deal_id: deal.id,
        merchant_name: deal.merchant_name.clone(),
        monthly_volume_cents: deal.monthly_volume_cents,
    }
}
