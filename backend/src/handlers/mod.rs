use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;

use crate::AppState;

pub mod events;
pub mod runs;
pub mod stats;
pub mod workflows;

pub use events::event_routes;
pub use runs::run_routes;
pub use stats::stats_routes;
pub use workflows::workflow_routes;

pub async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({"status": "healthy", "service": "autoflow-api"})))
}

/// Every HTTP route, bound to `state`
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1/workflows", workflow_routes())
        .nest("/api/v1/events", event_routes())
        .nest("/api/v1/runs", run_routes())
        .nest("/api/v1/stats", stats_routes())
        .with_state(state)
}
