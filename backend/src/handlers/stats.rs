use autoflow_shared::AutomationStats;
use axum::{extract::State, response::Json, routing::get, Router};
use std::sync::Arc;

use crate::{ApiResult, AppState};

pub fn stats_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(automation_stats))
}

async fn automation_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<AutomationStats>> {
    let worker = state.worker_stats.as_ref().map(|stats| stats.snapshot());
    Ok(Json(state.engine.stats(worker).await?))
}
