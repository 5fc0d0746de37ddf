//! Kanban pipeline endpoint: one keyset page per stage.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    response::IntoResponse,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// GET /pipeline?perStage=10&repId=X&cursorLead=...&cursorQuoted=...
///
/// Return every stage as an independent column. Each column carries its own
/// cursor, so loading more leads never re-fetches or shifts the other
/// columns.
pub async fn get_pipeline(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::PipelineQuery>,
) -> axum::response::Response {
    let request = match dto::to_pipeline_request(query) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services.deals.pipeline(&request).await {
        Ok(page) => Json(dto::pipeline_to_json(page)).into_response(),
        Err(e) => errors::deal_store_error_to_response(e),
    }
}
