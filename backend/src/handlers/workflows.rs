//! Workflow management endpoints

use autoflow_shared::{TestDispatchRequest, TestDispatchResponse};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::workflows::{WorkflowDefinition, WorkflowInput};
use crate::{ApiResult, AppState, PaginatedResponse, PaginationParams};

pub fn workflow_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_workflows).post(create_workflow))
        .route("/:id", get(get_workflow).put(update_workflow).delete(delete_workflow))
        .route("/:id/toggle", post(toggle_workflow))
        .route("/:id/test", post(test_workflow))
}

async fn list_workflows(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> ApiResult<Json<PaginatedResponse<WorkflowDefinition>>> {
    let (workflows, total) = state
        .engine
        .list_workflows(params.limit(), params.offset())
        .await?;
    Ok(Json(PaginatedResponse::new(workflows, &params, total)))
}

async fn create_workflow(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WorkflowInput>,
) -> ApiResult<(StatusCode, Json<WorkflowDefinition>)> {
    payload.validate()?;
    let workflow = state.engine.create_workflow(payload).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowDefinition>> {
    Ok(Json(state.engine.get_workflow(id).await?))
}

async fn update_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<WorkflowInput>,
) -> ApiResult<Json<WorkflowDefinition>> {
    payload.validate()?;
    Ok(Json(state.engine.update_workflow(id, payload).await?))
}

async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.engine.delete_workflow(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowDefinition>> {
    Ok(Json(state.engine.toggle_workflow(id).await?))
}

async fn test_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<TestDispatchRequest>,
) -> ApiResult<Json<TestDispatchResponse>> {
    let response = state
        .engine
        .test_dispatch(id, request.payload, request.dry_run)
        .await?;
    Ok(Json(response))
}
