use autoflow_shared::{AutomationLog, RunStatus};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::store::RunFilter;
use crate::workflows::AutomationRun;
use crate::{ApiResult, AppState, PaginatedResponse, PaginationParams};

#[derive(Debug, Deserialize)]
pub struct RunListParams {
    pub workflow_id: Option<Uuid>,
    pub status: Option<RunStatus>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl RunListParams {
    fn pagination(&self) -> PaginationParams {
        let defaults = PaginationParams::default();
        PaginationParams {
            page: self.page.unwrap_or(defaults.page),
            per_page: self.per_page.unwrap_or(defaults.per_page),
        }
    }
}

pub fn run_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_runs))
        .route("/:id", get(get_run))
        .route("/:id/logs", get(run_logs))
}

async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RunListParams>,
) -> ApiResult<Json<PaginatedResponse<AutomationRun>>> {
    let filter = RunFilter {
        workflow_id: params.workflow_id,
        status: params.status,
    };
    let pagination = params.pagination();
    let (runs, total) = state
        .engine
        .list_runs(&filter, pagination.limit(), pagination.offset())
        .await?;
    Ok(Json(PaginatedResponse::new(runs, &pagination, total)))
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AutomationRun>> {
    Ok(Json(state.engine.get_run(id).await?))
}

async fn run_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<AutomationLog>>> {
    Ok(Json(state.engine.run_logs(id).await?))
}
