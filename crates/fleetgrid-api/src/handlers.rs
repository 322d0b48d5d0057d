//! REST API handlers.
//!
//! Notification handlers delegate to the reconciler and router; lookup
//! handlers read the state store directly. All answers use `ApiResponse`.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::warn;

use fleetgrid_core::*;
use fleetgrid_reconciler::ReconcileError;
use fleetgrid_router::RouteOutcome;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn not_found(msg: &str) -> axum::response::Response {
    error_response(msg, StatusCode::NOT_FOUND).into_response()
}

fn internal_error(msg: &str) -> axum::response::Response {
    error_response(msg, StatusCode::INTERNAL_SERVER_ERROR).into_response()
}

// ── Notifications ──────────────────────────────────────────────

/// POST /api/v1/events/task-stopped
pub async fn task_stopped(
    State(state): State<ApiState>,
    Json(event): Json<TaskStoppedEvent>,
) -> impl IntoResponse {
    match state.reconciler.handle(&event).await {
        Ok(outcome) => ApiResponse::ok(outcome).into_response(),
        Err(e @ ReconcileError::Transient(_)) => {
            warn!(task = %event.task_id, error = %e, "task-stopped handling deferred");
            error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE).into_response()
        }
        Err(e @ ReconcileError::InvariantViolation { .. }) => {
            error_response(&e.to_string(), StatusCode::CONFLICT).into_response()
        }
        Err(e @ (ReconcileError::Rejected(_) | ReconcileError::UnresolvedAddress { .. })) => {
            warn!(task = %event.task_id, error = %e, "task-stopped notification rejected");
            error_response(&e.to_string(), StatusCode::UNPROCESSABLE_ENTITY).into_response()
        }
    }
}

/// POST /api/v1/events/matchmaking
pub async fn matchmaking_event(
    State(state): State<ApiState>,
    Json(event): Json<MatchEvent>,
) -> impl IntoResponse {
    match state.router.handle(&event).await {
        Ok(outcome @ RouteOutcome::Duplicate { .. }) => ApiResponse::ok(outcome).into_response(),
        Ok(outcome) => (StatusCode::CREATED, ApiResponse::ok(outcome)).into_response(),
        Err(e) => internal_error(&e.to_string()),
    }
}

// ── Player connections ─────────────────────────────────────────

/// GET /api/v1/players/{player_id}/connection
pub async fn player_connection(
    State(state): State<ApiState>,
    Path(player_id): Path<String>,
) -> impl IntoResponse {
    match state.router.store().latest_for_player(&player_id) {
        Ok(Some(record)) => ApiResponse::ok(record).into_response(),
        Ok(None) => not_found("no connection for player"),
        Err(e) => internal_error(&e.to_string()),
    }
}

/// POST /api/v1/players/{player_id}/connection/ack
pub async fn acknowledge_connection(
    State(state): State<ApiState>,
    Path(player_id): Path<String>,
) -> impl IntoResponse {
    match state.router.store().acknowledge(&player_id, epoch_secs()) {
        Ok(Some(record)) => ApiResponse::ok(record).into_response(),
        Ok(None) => not_found("no connection for player"),
        Err(e) => internal_error(&e.to_string()),
    }
}

/// GET /api/v1/tickets/{ticket_id}
pub async fn get_ticket(
    State(state): State<ApiState>,
    Path(ticket_id): Path<String>,
) -> impl IntoResponse {
    match state.router.store().get_assignment(&ticket_id) {
        Ok(Some(record)) => ApiResponse::ok(record).into_response(),
        Ok(None) => not_found("ticket not found"),
        Err(e) => internal_error(&e.to_string()),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.cache.snapshot();
    let age_secs = snapshot.age_secs(epoch_secs());
    let loaded = snapshot.generation() > 0;
    ApiResponse::ok(serde_json::json!({
        "status": "ok",
        "mapping": {
            "generation": snapshot.generation(),
            "entries": snapshot.len(),
            "age_secs": if loaded { Some(age_secs) } else { None },
            "stale": !loaded || age_secs > state.cache.max_age_secs(),
        }
    }))
}
