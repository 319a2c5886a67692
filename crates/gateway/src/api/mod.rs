//! HTTP API surface.

pub mod activity;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(activity::healthz))
        .route("/v1/activity", post(activity::activity_stream))
        .route("/v1/sessions", get(activity::list_sessions))
        .route("/v1/sessions/:session_id/cancel", post(activity::cancel_session))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
