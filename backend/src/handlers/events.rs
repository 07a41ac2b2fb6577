use autoflow_shared::{DispatchEventRequest, DispatchEventResponse};
use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use std::sync::Arc;

use crate::workflows::{EventSource, TriggerEvent};
use crate::{ApiError, ApiResult, AppState};

pub fn event_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(dispatch_event))
}

/// Matching workflows get a queued run each; nothing executes inside the request
async fn dispatch_event(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DispatchEventRequest>,
) -> ApiResult<(StatusCode, Json<DispatchEventResponse>)> {
    let event_type = request.event_type.trim();
    if event_type.is_empty() {
        return Err(ApiError::validation_single("event_type", "event_type is required"));
    }

    let event = TriggerEvent::new(event_type, request.payload, EventSource::Api);
    let run_ids = state.engine.dispatch_event(&event).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DispatchEventResponse {
            event_type: event.event_type,
            run_ids,
        }),
    ))
}
