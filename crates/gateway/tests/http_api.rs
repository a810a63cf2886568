//! The HTTP contract: request validation, error bodies, CORS, and the
//! SSE stream, driven through the router with a scripted provider.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use colony_domain::chat::{ChatMessage, Completion, CompletionOptions, Embedding};
use colony_domain::config::{Config, ModelEntry, ModelKind};
use colony_domain::error::{Error, Result};
use colony_domain::stream::{BoxStream, CompletionChunk};
use colony_gateway::api;
use colony_gateway::bootstrap::build_state_with_layer;
use colony_gateway::state::AppState;
use colony_providers::{ModelLayer, ProviderAdapter};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ScriptedAdapter {
    scripts: Mutex<VecDeque<Vec<CompletionChunk>>>,
    delay: Duration,
}

#[async_trait::async_trait]
impl ProviderAdapter for ScriptedAdapter {
    async fn complete_stream(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<CompletionChunk>>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let chunks = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![CompletionChunk::finished(None)]);
        Ok(Box::pin(futures_util::stream::iter(
            chunks.into_iter().map(Ok),
        )))
    }

    async fn complete(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<Completion> {
        Ok(Completion::default())
    }

    async fn embed(&self, _model: &str, _text: &str) -> Result<Embedding> {
        Err(Error::Provider {
            provider: "scripted".into(),
            message: "not supported".into(),
        })
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}

fn test_state(scripts: Vec<Vec<CompletionChunk>>, delay: Duration) -> AppState {
    let mut layer = ModelLayer::new();
    layer.insert(
        "fake",
        Arc::new(ScriptedAdapter {
            scripts: Mutex::new(scripts.into()),
            delay,
        }),
        vec![ModelEntry {
            kind: ModelKind::Llm,
            name: "fake-llm".into(),
        }],
    );
    build_state_with_layer(Arc::new(Config::default()), layer).unwrap()
}

fn hello_state() -> AppState {
    test_state(
        vec![vec![CompletionChunk {
            content: "hello".into(),
            finished: true,
            ..CompletionChunk::default()
        }]],
        Duration::ZERO,
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn post_send(state: &AppState, body: &str) -> (StatusCode, Value) {
    let response = api::router(state.clone())
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/send")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn wait_for_completion(state: &AppState, task_id: &str) {
    for _ in 0..500 {
        if let Some(snap) = state.tasks.snapshot(task_id) {
            if snap.task.completion_status.is_some() && !snap.is_running {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {task_id} did not terminate in time");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /send
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn empty_message_is_rejected() {
    let state = hello_state();
    let (status, body) = post_send(&state, r#"{"message":""}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION");
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let state = hello_state();
    let (status, body) = post_send(&state, "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION");
}

#[tokio::test]
async fn send_without_task_id_spawns_a_task() {
    let state = hello_state();
    let (status, body) = post_send(&state, r#"{"message":"hi"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");

    let task_id = body["taskId"].as_str().unwrap();
    wait_for_completion(&state, task_id).await;
    let snap = state.tasks.snapshot(task_id).unwrap();
    assert_eq!(snap.task.completion_status.as_deref(), Some("success"));
    assert_eq!(snap.messages.last().unwrap().content, "hello");
}

#[tokio::test]
async fn send_to_unknown_task_is_send_failed() {
    let state = hello_state();
    let (status, body) =
        post_send(&state, r#"{"message":"hi","taskId":"ghost"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "SEND_FAILED");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("not found"));
}

#[tokio::test]
async fn send_to_completed_task_is_send_failed() {
    let state = hello_state();
    let (_, body) = post_send(&state, r#"{"message":"hi"}"#).await;
    let task_id = body["taskId"].as_str().unwrap().to_string();
    wait_for_completion(&state, &task_id).await;

    let (status, body) = post_send(
        &state,
        &json!({ "message": "more", "taskId": &task_id }).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "SEND_FAILED");
    assert_eq!(
        body["error"]["message"],
        format!("Task {task_id} is already completed")
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing & CORS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn unknown_route_is_404() {
    let state = hello_state();
    let response = api::router(state)
        .oneshot(
            Request::builder()
                .uri("/definitely/not/here")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_method_is_404() {
    let state = hello_state();
    let response = api::router(state)
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/send")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cors_preflight_is_accepted() {
    let state = hello_state();
    let response = api::router(state)
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/send")
                .header(header::ORIGIN, "http://example.com")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /stream/:taskId
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read body chunks until `expected_events` SSE event blocks arrived.
async fn read_events(body: Body, expected_events: usize) -> String {
    let mut data = String::new();
    let mut stream = body.into_data_stream();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while data.matches("event:").count() < expected_events {
        let chunk = tokio::time::timeout_at(deadline, stream.next())
            .await
            .expect("timed out waiting for SSE events")
            .expect("body ended before all events arrived")
            .expect("body error");
        data.push_str(&String::from_utf8_lossy(&chunk));
    }
    data
}

#[tokio::test]
async fn stream_opens_with_headers_and_start_event() {
    let state = hello_state();
    let response = api::router(state)
        .oneshot(
            Request::builder()
                .uri("/stream/some-task")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(
        response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("no-cache")
    );

    let data = read_events(response.into_body(), 1).await;
    assert!(data.contains("event: start"));
    assert!(data.contains(r#"{"taskId":"some-task"}"#));
}

#[tokio::test]
async fn stream_delivers_content_and_message_complete() {
    // Slow first completion so the subscriber attaches before chunks flow.
    let state = test_state(
        vec![vec![
            CompletionChunk::content("he"),
            CompletionChunk::content("llo"),
            CompletionChunk::finished(None),
        ]],
        Duration::from_millis(100),
    );

    let (_, body) = post_send(&state, r#"{"message":"hi"}"#).await;
    let task_id = body["taskId"].as_str().unwrap().to_string();

    let response = api::router(state.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/stream/{task_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // start + content(0) + content(-1) + message_complete
    let data = read_events(response.into_body(), 4).await;

    let start_pos = data.find("event: start").expect("start event");
    let first = data.find(r#""index":0"#).expect("first chunk");
    let last = data.find(r#""index":-1"#).expect("terminal chunk");
    let complete = data.find("event: message_complete").expect("completion");
    assert!(start_pos < first && first < last && last < complete);
    assert!(data.contains(r#""content":"he""#));
    assert!(data.contains(r#""content":"llo""#));

    wait_for_completion(&state, &task_id).await;
}
