use axum::{Router, routing::get};

pub mod dashboard;
pub mod deals;
pub mod intel;
pub mod jobs;
pub mod pipeline;
pub mod system;

pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/pipeline", get(pipeline::get_pipeline))
        .nest("/deals", deals::router().merge(intel::router()))
        .nest("/dashboard", dashboard::router())
        .nest("/jobs", jobs::router())
}
