//! Background job polling endpoints.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use gearcrm_core::JobId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/:id", get(get_job))
}

/// GET /jobs/:id
///
/// Poll one job. Clients submit work elsewhere (e.g. statement analysis) and
/// watch it move pending -> processing -> completed or failed here.
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: JobId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };

    match services.jobs.get(id).await {
        Ok(job) => Json(dto::job_to_json(job)).into_response(),
        Err(e) => errors::job_store_error_to_response(e),
    }
}

pub async fn get_stats(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.jobs.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => errors::job_store_error_to_response(e),
    }
}
