//! Dashboard summary endpoints.
//!
//! The summary aggregates the whole deal book plus job counts, so it is
//! cached under the short dashboard-summary TTL. Unlike merchant intel there
//! is no stale fallback here: a summary that cannot be computed is an error,
//! not yesterday's numbers.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};

use gearcrm_infra::cache::CacheCategory;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

const SUMMARY_KEY_SUFFIX: &str = "global";

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/summary", get(get_summary))
        .route("/summary/refresh", post(refresh_summary))
        .route("/summary/cache-status", get(summary_cache_status))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

pub async fn get_summary(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let now = Utc::now();
    match compute_cached_summary(&services, now).await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => errors::cache_error_to_response(err),
    }
}

/// POST /dashboard/summary/refresh
///
/// Drop the cached summary and recompute it immediately.
pub async fn refresh_summary(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let key = CacheCategory::DashboardSummary.key(SUMMARY_KEY_SUFFIX);
    services.cache.invalidate(&key);

    let now = Utc::now();
    match compute_cached_summary(&services, now).await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => errors::cache_error_to_response(err),
    }
}

pub async fn summary_cache_status(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let key = CacheCategory::DashboardSummary.key(SUMMARY_KEY_SUFFIX);
    let status = services.cache.status(&key, Utc::now());
    Json(dto::cache_status_to_json(status)).into_response()
}

async fn compute_cached_summary(
    services: &AppServices,
    now: DateTime<Utc>,
) -> Result<serde_json::Value, gearcrm_infra::cache::CacheError> {
    let key = CacheCategory::DashboardSummary.key(SUMMARY_KEY_SUFFIX);
    let deals = services.deals.clone();
    let jobs = services.jobs.clone();

    services
        .cache
        .get_or_compute(&key, CacheCategory::DashboardSummary, now, || async move {
            let rollup = deals.stage_rollup().await.map_err(|e| e.to_string())?;
            let stats = jobs.stats().await.map_err(|e| e.to_string())?;

            let total_deals: u64 = rollup.iter().map(|row| row.deals).sum();
            let total_volume: i64 = rollup.iter().map(|row| row.monthly_volume_cents).sum();

            Ok::<_, String>(serde_json::json!({
                "stages": dto::rollup_to_json(rollup),
                "totalDeals": total_deals,
                "totalMonthlyVolumeCents": total_volume,
                "jobs": stats,
                "generatedAt": now.to_rfc3339(),
            }))
        })
        .await
}
