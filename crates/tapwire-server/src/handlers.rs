//! HTTP request handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use tapwire_core::{
    Broadcaster, ExchangeRecord, HookResponse, LifecycleEvent, LifecycleSubmission,
};

use crate::error::{ApiError, Result};
use crate::state::AppState;

/// POST /api/hook-event - ingest a lifecycle event.
///
/// The body is parsed by hand so malformed JSON yields the standard
/// `{error, code}` 400 response.
pub async fn ingest_hook_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<HookResponse>> {
    let submission: LifecycleSubmission = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!("Rejected hook event: {}", e);
        ApiError::BadRequest(format!("invalid hook event: {}", e))
    })?;

    let event = LifecycleEvent::accept(submission);
    let response = event.response.clone();

    tracing::info!(
        id = %event.id(),
        hook = %event.hook_event_name,
        session = ?event.session_id,
        "Hook event captured"
    );

    let event = state.lifecycle.append(event);
    state.hub.notify_lifecycle_event(event);

    Ok(Json(response))
}

/// GET /api/requests - all captured exchanges, oldest first.
pub async fn list_requests(State(state): State<AppState>) -> Json<Vec<Arc<ExchangeRecord>>> {
    Json(state.exchanges.get_all())
}

/// GET /api/requests/{id}
pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Arc<ExchangeRecord>>> {
    state
        .exchanges
        .get_by_id(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("request {}", id)))
}

/// DELETE /api/requests - clear both stores.
pub async fn clear_requests(State(state): State<AppState>) -> StatusCode {
    state.clear_all();
    StatusCode::NO_CONTENT
}

/// GET /api/hook-events - all lifecycle events, oldest first.
pub async fn list_hook_events(State(state): State<AppState>) -> Json<Vec<Arc<LifecycleEvent>>> {
    Json(state.lifecycle.get_all())
}

/// GET /api/hook-events/{id}
pub async fn get_hook_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Arc<LifecycleEvent>>> {
    state
        .lifecycle
        .get_by_id(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("hook event {}", id)))
}
