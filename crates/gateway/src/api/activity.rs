//! Activity endpoints — the client-facing stream surface.
//!
//! `POST /v1/activity` accepts `{sessionId, message, model?,
//! enabledTools?, options?}` and answers with `text/event-stream`: one
//! `event: <variant>\ndata: <json>\n\n` frame per canonical event,
//! ending with `activity_complete` and EOF. A client disconnect cancels
//! the in-flight request.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_core::Stream;
use serde::Deserialize;

use ah_activity::{EventFanout, SubscriberPolicy};
use ah_domain::event::ActivityEvent;
use ah_orchestrator::ActivityRequest;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityBody {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub enabled_tools: Option<Vec<String>>,
    #[serde(default)]
    pub groups: Option<Vec<String>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/activity (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn activity_stream(
    State(state): State<AppState>,
    Json(body): Json<ActivityBody>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let request = ActivityRequest {
        session_id: body.session_id.clone(),
        message_id: body
            .message_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        user_id: body.user_id.unwrap_or_else(|| "local".into()),
        message: body.message,
        model: body
            .model
            .unwrap_or_else(|| state.config.default_model.clone()),
        provider_id: None,
        enabled_tools: body.enabled_tools,
        groups: body.groups,
    };

    let fanout = Arc::new(EventFanout::new(state.services.options.fanout_buffer));
    let sse_policy = if state.services.options.sse_lossless {
        SubscriberPolicy::Lossless
    } else {
        SubscriberPolicy::Coalesce
    };
    let mut subscription = fanout.subscribe("sse", sse_policy);

    // Metrics aggregation rides the lossy side of the fanout.
    let mut metrics = fanout.subscribe("metrics", SubscriberPolicy::Coalesce);
    let metrics_session = body.session_id.clone();
    tokio::spawn(async move {
        let mut last_tokens = None;
        while let Some(event) = metrics.recv().await {
            if let ActivityEvent::MetricsUpdate { tokens, .. } = event {
                last_tokens = Some(tokens);
            }
        }
        if let Some(tokens) = last_tokens {
            tracing::info!(
                session_id = %metrics_session,
                input = tokens.input,
                output = tokens.output,
                reasoning = tokens.reasoning,
                "session token usage"
            );
        }
    });

    let cancel = state.cancel_map.register(&request.session_id);
    let session_id = request.session_id.clone();
    let handle = state
        .orchestrator
        .clone()
        .spawn(request, fanout, cancel.clone());

    // Deregister the cancel token when the run ends.
    let cancel_map = state.cancel_map.clone();
    let cleanup_session = session_id.clone();
    tokio::spawn(async move {
        let _ = handle.await;
        cancel_map.remove(&cleanup_session);
    });

    let stream = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            let data = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize activity event");
                    continue;
                }
            };
            yield Ok(Event::default().event(event.event_name()).data(data));
        }
        // Subscription closed after activity_complete: EOF follows.
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session management
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    match state.services.store.list_sessions().await {
        Ok(sessions) => Json(serde_json::json!({ "sessions": sessions })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

pub async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    if state.cancel_map.cancel(&session_id) {
        Json(serde_json::json!({ "cancelled": session_id })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no running request for session" })),
        )
            .into_response()
    }
}

pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
