//! HTTP handlers for session events, inspection and health

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::models::{error_codes, ApiError, EventRequest, EventResponse};
use crate::conversation::{Dispatcher, SessionSnapshot};
use crate::error::BotError;
use crate::metrics::METRICS;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// Expected `X-Bot-Token`; requests are not checked when unset
    pub transport_token: Option<Arc<SecretString>>,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

fn bot_error(err: BotError) -> (StatusCode, Json<ApiError>) {
    let (status, code) = match &err {
        BotError::InvalidUpload(_) | BotError::RequestTooLarge { .. } => {
            (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR)
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, error_codes::INTERNAL_ERROR),
    };
    (status, Json(ApiError::new(code, err.to_string())))
}

/// Deliver one event to a session
///
/// POST /api/v1/sessions/:id/events
pub async fn post_event(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<EventRequest>,
) -> ApiResult<Json<EventResponse>> {
    if session_id.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(
                error_codes::VALIDATION_ERROR,
                "Session id cannot be empty",
            )),
        ));
    }

    let event = request.payload.into_event().map_err(|e| {
        warn!("Rejected event for session {}: {}", session_id, e);
        bot_error(e)
    })?;

    let replies = state
        .dispatcher
        .handle(&session_id, request.username.as_deref(), event)
        .await;

    Ok(Json(EventResponse {
        session_id,
        replies,
    }))
}

/// GET /api/v1/sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionSnapshot>> {
    state
        .dispatcher
        .snapshot(&session_id)
        .await
        .map(Json)
        .ok_or_else(|| not_found(&session_id))
}

/// Forget a session, deleting any pending uploads
///
/// DELETE /api/v1/sessions/:id
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.dispatcher.sessions().remove(&session_id).await {
        info!("Session {} deleted", session_id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&session_id))
    }
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn metrics() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.export_prometheus(),
    )
}

fn not_found(session_id: &str) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new(
            error_codes::NOT_FOUND,
            format!("Session {} not found", session_id),
        )),
    )
}
