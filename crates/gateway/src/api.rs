//! HTTP surface of the runtime.
//!
//! - `POST /send`            — spawn a task, or deliver a message to one
//! - `GET  /stream/:taskId`  — long-lived SSE stream of that task's output
//!
//! Everything else is 404; CORS preflight is accepted for any route.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use colony_domain::ability::{InvokeOutcome, SYSTEM_CALLER};

use crate::state::AppState;
use crate::subscribers::SubscriberTable;

/// Build the gateway router with CORS and request tracing applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    // Method fallbacks keep the contract simple: anything that is not
    // exactly POST /send or GET /stream/:taskId is 404, not 405.
    Router::new()
        .route("/send", post(send).fallback(not_found))
        .route("/stream/:task_id", get(stream).fallback(not_found))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build a standardized JSON error response:
/// `{ "error": { "code": ..., "message": ... } }`.
fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "error": { "code": code, "message": message.into() } })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /send
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBody {
    pub message: String,
    #[serde(default)]
    pub task_id: Option<String>,
}

async fn send(
    State(state): State<AppState>,
    body: Result<Json<SendBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => {
            return api_error(StatusCode::BAD_REQUEST, "VALIDATION", rejection.body_text())
        }
    };

    if body.message.is_empty() {
        return api_error(
            StatusCode::BAD_REQUEST,
            "VALIDATION",
            "message must not be empty",
        );
    }

    match body.task_id {
        // No target: spawn a fresh task with the message as its goal.
        None => {
            let outcome = state
                .bus
                .invoke_value(
                    "task:spawn",
                    &uuid::Uuid::new_v4().to_string(),
                    SYSTEM_CALLER,
                    &json!({ "goal": body.message }),
                )
                .await;
            match outcome {
                InvokeOutcome::Success { value } => Json(json!({
                    "taskId": value["taskId"],
                    "status": "running",
                }))
                .into_response(),
                other => api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    other.failure_message().unwrap_or("task:spawn failed"),
                ),
            }
        }

        // Target given: deliver to the existing task.
        Some(task_id) => {
            let outcome = state
                .bus
                .invoke_value(
                    "task:send",
                    &uuid::Uuid::new_v4().to_string(),
                    SYSTEM_CALLER,
                    &json!({ "receiverId": &task_id, "message": body.message }),
                )
                .await;
            match outcome {
                InvokeOutcome::Success { .. } => Json(json!({
                    "taskId": task_id,
                    "status": "running",
                }))
                .into_response(),
                InvokeOutcome::Error { message } => {
                    api_error(StatusCode::BAD_REQUEST, "SEND_FAILED", message)
                }
                other => api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    other.failure_message().unwrap_or("task:send failed"),
                ),
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /stream/:taskId
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Removes the subscriber-table entry when the HTTP stream is dropped,
/// however it ends (client disconnect, server shutdown, replacement).
struct SubscriberGuard {
    table: Arc<SubscriberTable>,
    task_id: String,
    generation: u64,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.table.unsubscribe(&self.task_id, self.generation);
    }
}

async fn stream(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    if task_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing taskId" })),
        )
            .into_response();
    }

    tracing::debug!(task_id = %task_id, "stream subscriber attached");
    let (generation, mut rx) = state.subscribers.subscribe(&task_id);
    let guard = SubscriberGuard {
        table: state.subscribers.clone(),
        task_id,
        generation,
    };

    let events = async_stream::stream! {
        let _guard = guard;
        while let Some(frame) = rx.recv().await {
            yield Ok::<Event, Infallible>(
                Event::default()
                    .event(frame.event_type())
                    .data(frame.payload().to_string()),
            );
        }
    };

    let mut response = Sse::new(events)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(30))
                .text("heartbeat"),
        )
        .into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fallback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn not_found() -> Response {
    api_error(StatusCode::NOT_FOUND, "NOT_FOUND", "no such route")
}
