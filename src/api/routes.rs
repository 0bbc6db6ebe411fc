//! Router for the bot's HTTP event surface

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use secrecy::ExposeSecret;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::handlers::{self, AppState};
use super::models::{error_codes, ApiError};

pub const TOKEN_HEADER: &str = "x-bot-token";

/// Build the router
///
/// Session routes require the transport token when one is configured;
/// `/health` and `/metrics` are always open.
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics));

    let session_routes = Router::new()
        .route("/api/v1/sessions/:id/events", post(handlers::post_event))
        .route(
            "/api/v1/sessions/:id",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        // Json's own 2 MB cap would reject base64 uploads well under the limit
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware_fn,
        ));

    public_routes
        .merge(session_routes)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Reject requests whose `X-Bot-Token` does not match
pub async fn auth_middleware_fn(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.transport_token else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    if provided == Some(expected.expose_secret().as_str()) {
        next.run(request).await
    } else {
        warn!("Rejected request to {} with a missing or wrong token", request.uri().path());
        (
            StatusCode::UNAUTHORIZED,
            Json(ApiError::new(
                error_codes::UNAUTHORIZED,
                "Missing or invalid X-Bot-Token",
            )),
        )
            .into_response()
    }
}
