//! HTTP API application wiring (Axum router + service wiring).
//!
//! If you're new to Rust, this folder is structured like:
//! - `services.rs`: infrastructure wiring (stores, cache, intel provider, workers)
//! - `routes/`: HTTP routes + handlers (one file per resource area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests). Also starts the statement worker and the stale-job
/// recovery sweep; both live as long as the returned router's service graph.
pub async fn build_app() -> Router {
    let services = Arc::new(services::build_services().await);

    routes::router()
        .layer(Extension(services))
        .layer(ServiceBuilder::new())
}
