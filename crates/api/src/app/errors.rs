use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use gearcrm_core::{CursorError, DomainError};
use gearcrm_infra::cache::CacheError;
use gearcrm_infra::deals::{DealStage, DealStoreError};
use gearcrm_infra::jobs::JobStoreError;

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
    }
}

pub fn deal_store_error_to_response(err: DealStoreError) -> axum::response::Response {
    match err {
        DealStoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("deal {id} not found"))
        }
        DealStoreError::Domain(e) => domain_error_to_response(e),
        DealStoreError::Storage(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg),
    }
}

pub fn job_store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        JobStoreError::AlreadyClaimed { id, status } => json_error(
            StatusCode::CONFLICT,
            "already_claimed",
            format!("job {id} is already {status}"),
        ),
        JobStoreError::InvalidTransition { id, from, to } => json_error(
            StatusCode::CONFLICT,
            "invalid_transition",
            format!("job {id} cannot move from {from} to {to}"),
        ),
        JobStoreError::Storage(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg),
    }
}

/// Cursor tokens come straight from clients, so every decode failure is a
/// client error, never a 500.
pub fn cursor_error_to_response(err: CursorError) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_cursor", err.to_string())
}

pub fn cache_error_to_response(err: CacheError) -> axum::response::Response {
    match err {
        CacheError::Compute(msg) => json_error(StatusCode::BAD_GATEWAY, "compute_failed", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_stage(s: &str) -> Result<DealStage, axum::response::Response> {
    s.parse::<DealStage>().map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_stage",
            "stage must be one of: lead, contacted, quoted, signed, installed",
        )
    })
}
