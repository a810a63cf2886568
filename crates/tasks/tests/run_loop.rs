//! End-to-end run-loop scenarios against a scripted provider: the full
//! bus + ledger + model layer + task manager wiring, with a capturing
//! `shell:send` standing in for the transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use colony_bus::{handler_fn, Bus};
use colony_domain::ability::{AbilityDescriptor, OutcomeTag, SYSTEM_CALLER};
use colony_domain::chat::{ChatMessage, Completion, CompletionOptions, Embedding};
use colony_domain::config::{ModelEntry, ModelKind};
use colony_domain::error::{Error, Result};
use colony_domain::message::Role;
use colony_domain::stream::{BoxStream, CompletionChunk, ToolCallFragment};
use colony_ledger::{register_ledger, NullLedger};
use colony_providers::{register_model_layer, ModelLayer, ProviderAdapter};
use colony_tasks::{register_task_manager, TaskManager};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Returns one scripted chunk sequence per completion call, with an
/// optional artificial latency before the stream starts yielding.
struct ScriptedAdapter {
    scripts: Mutex<VecDeque<Vec<CompletionChunk>>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    fn new(scripts: Vec<Vec<CompletionChunk>>, delay: Duration) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for ScriptedAdapter {
    async fn complete_stream(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<CompletionChunk>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
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

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One captured `shell:send` call: (caller, content, index, message id).
type Frame = (String, String, i64, String);

struct Harness {
    bus: Arc<Bus>,
    manager: Arc<TaskManager>,
    adapter: Arc<ScriptedAdapter>,
    frames: Arc<Mutex<Vec<Frame>>>,
}

fn chunk(text: &str) -> CompletionChunk {
    CompletionChunk::content(text)
}

fn final_chunk(text: &str) -> CompletionChunk {
    CompletionChunk {
        content: text.into(),
        finished: true,
        ..CompletionChunk::default()
    }
}

fn tool_chunk(id: &str, name: &str, arguments: &str) -> CompletionChunk {
    CompletionChunk {
        tool_call: Some(ToolCallFragment {
            id: Some(id.into()),
            name: name.into(),
            arguments: arguments.into(),
        }),
        ..CompletionChunk::default()
    }
}

fn harness_with_delay(scripts: Vec<Vec<CompletionChunk>>, delay: Duration) -> Harness {
    let bus = Bus::new().unwrap();
    register_ledger(&bus, Arc::new(NullLedger)).unwrap();

    let adapter = Arc::new(ScriptedAdapter::new(scripts, delay));
    let mut layer = ModelLayer::new();
    layer.insert(
        "fake",
        adapter.clone() as Arc<dyn ProviderAdapter>,
        vec![ModelEntry {
            kind: ModelKind::Llm,
            name: "fake-llm".into(),
        }],
    );
    register_model_layer(&bus, layer).unwrap();

    let frames: Arc<Mutex<Vec<Frame>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = frames.clone();
    bus.register(
        AbilityDescriptor::new(
            "shell:send",
            "capture stream frames",
            json!({ "type": "object" }),
            json!({ "type": "object" }),
        )
        .unwrap(),
        handler_fn(move |call, input| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push((
                    call.caller_id,
                    input["content"].as_str().unwrap_or("").to_string(),
                    input["index"].as_i64().unwrap_or(0),
                    input["messageId"].as_str().unwrap_or("").to_string(),
                ));
                Ok(json!({ "success": true }))
            }
        }),
    )
    .unwrap();

    let manager = register_task_manager(&bus).unwrap();
    Harness {
        bus,
        manager,
        adapter,
        frames,
    }
}

fn harness(scripts: Vec<Vec<CompletionChunk>>) -> Harness {
    harness_with_delay(scripts, Duration::ZERO)
}

impl Harness {
    async fn spawn(&self, goal: &str) -> String {
        let outcome = self
            .bus
            .invoke_value(
                "task:spawn",
                "call-spawn",
                SYSTEM_CALLER,
                &json!({ "goal": goal }),
            )
            .await;
        outcome.into_value().expect("task:spawn should succeed")["taskId"]
            .as_str()
            .unwrap()
            .to_string()
    }

    /// Poll until the task reaches a terminal status and its loop has
    /// released the running flag.
    async fn wait_for_exit(&self, task_id: &str) {
        for _ in 0..500 {
            if let Some(snap) = self.manager.snapshot(task_id) {
                if snap.task.completion_status.is_some() && !snap.is_running {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {task_id} did not terminate in time");
    }

    fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn simple_completion_one_shot() {
    let h = harness(vec![vec![final_chunk("hello")]]);
    let task_id = h.spawn("hi").await;
    h.wait_for_exit(&task_id).await;

    let snap = h.manager.snapshot(&task_id).unwrap();
    assert_eq!(snap.task.completion_status.as_deref(), Some("success"));
    assert!(snap.task.updated_at >= snap.task.created_at);

    let roles: Vec<Role> = snap.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    assert_eq!(snap.messages[1].content, "hi");
    assert_eq!(snap.messages[2].content, "hello");

    let frames = h.frames();
    assert_eq!(frames.len(), 1);
    let (caller, content, index, _) = &frames[0];
    assert_eq!(caller, &task_id);
    assert_eq!(content, "hello");
    assert_eq!(*index, -1);
}

#[tokio::test]
async fn chunked_streaming_delivers_ordered_indexes() {
    let h = harness(vec![vec![
        chunk("he"),
        chunk("ll"),
        chunk("o"),
        CompletionChunk::finished(None),
    ]]);
    let task_id = h.spawn("hi").await;
    h.wait_for_exit(&task_id).await;

    let frames = h.frames();
    let sequence: Vec<(String, i64)> = frames
        .iter()
        .map(|(_, c, i, _)| (c.clone(), *i))
        .collect();
    assert_eq!(
        sequence,
        vec![
            ("he".to_string(), 0),
            ("ll".to_string(), 1),
            ("o".to_string(), -1)
        ]
    );

    // All chunks of one completion share a message id, and their
    // concatenation equals the recorded assistant message.
    let message_ids: Vec<&String> = frames.iter().map(|(_, _, _, m)| m).collect();
    assert!(message_ids.windows(2).all(|w| w[0] == w[1]));
    let assembled: String = frames.iter().map(|(_, c, _, _)| c.as_str()).collect();

    let snap = h.manager.snapshot(&task_id).unwrap();
    assert_eq!(snap.messages.last().unwrap().content, assembled);
}

#[tokio::test]
async fn one_tool_call_then_done() {
    let h = harness(vec![
        vec![
            tool_chunk("c1", "bus_list", "{}"),
            CompletionChunk::finished(None),
        ],
        vec![final_chunk("done")],
    ]);
    let task_id = h.spawn("inspect yourself").await;
    h.wait_for_exit(&task_id).await;

    let snap = h.manager.snapshot(&task_id).unwrap();
    assert_eq!(snap.task.completion_status.as_deref(), Some("success"));

    let contents: Vec<&str> = snap.messages.iter().map(|m| m.content.as_str()).collect();
    // system, goal, empty assistant turn, tool result, final answer
    assert_eq!(contents.len(), 5);
    assert_eq!(contents[2], "");
    assert!(contents[3].starts_with("Tool bus:list result: "));
    assert!(contents[3].contains("modules"));
    assert_eq!(contents[4], "done");

    // The user saw the final answer.
    let frames = h.frames();
    assert_eq!(frames.last().unwrap().1, "done");
    assert_eq!(frames.last().unwrap().2, -1);
}

#[tokio::test]
async fn fragmented_tool_call_assembles_and_dispatches() {
    let h = harness(vec![
        vec![
            tool_chunk("c1", "bus_", ""),
            tool_chunk("c1", "list", "{"),
            tool_chunk("c1", "", "}"),
            CompletionChunk::finished(None),
        ],
        vec![final_chunk("done")],
    ]);
    let task_id = h.spawn("go").await;
    h.wait_for_exit(&task_id).await;

    let snap = h.manager.snapshot(&task_id).unwrap();
    assert_eq!(snap.task.completion_status.as_deref(), Some("success"));
    assert!(snap
        .messages
        .iter()
        .any(|m| m.content.starts_with("Tool bus:list result: ")));
}

#[tokio::test]
async fn cancel_during_run_wins_over_success() {
    let h = harness_with_delay(
        vec![vec![final_chunk("late")], vec![final_chunk("never")]],
        Duration::from_millis(150),
    );
    let task_id = h.spawn("slow work").await;

    // Cancel while the first LLM request is still in flight.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let outcome = h
        .bus
        .invoke_value(
            "task:cancel",
            "call-cancel",
            SYSTEM_CALLER,
            &json!({ "taskId": &task_id, "reason": "user" }),
        )
        .await;
    assert_eq!(outcome.tag(), OutcomeTag::Success);

    h.wait_for_exit(&task_id).await;
    let snap = h.manager.snapshot(&task_id).unwrap();
    assert_eq!(snap.task.completion_status.as_deref(), Some("cancelled"));

    // The in-flight iteration completed normally: its chunks reached
    // the subscriber, and no second LLM call was made.
    let frames = h.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].1, "late");
    assert_eq!(h.adapter.call_count(), 1);
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let h = harness_with_delay(vec![vec![final_chunk("x")]], Duration::from_millis(100));
    let task_id = h.spawn("work").await;

    for _ in 0..2 {
        let outcome = h
            .bus
            .invoke_value(
                "task:cancel",
                "call-cancel",
                SYSTEM_CALLER,
                &json!({ "taskId": &task_id, "reason": "twice" }),
            )
            .await;
        let value = outcome.into_value().expect("cancel should succeed");
        assert_eq!(value["status"], "cancelled");
    }

    h.wait_for_exit(&task_id).await;
    assert_eq!(
        h.manager
            .snapshot(&task_id)
            .unwrap()
            .task
            .completion_status
            .as_deref(),
        Some("cancelled")
    );
}

#[tokio::test]
async fn send_to_completed_task_is_rejected() {
    let h = harness(vec![vec![final_chunk("hello")]]);
    let task_id = h.spawn("hi").await;
    h.wait_for_exit(&task_id).await;

    let outcome = h
        .bus
        .invoke_value(
            "task:send",
            "call-send",
            SYSTEM_CALLER,
            &json!({ "receiverId": &task_id, "message": "more" }),
        )
        .await;
    assert_eq!(outcome.tag(), OutcomeTag::Error);
    assert_eq!(
        outcome.failure_message().unwrap(),
        &format!("Task {task_id} is already completed")
    );
}

#[tokio::test]
async fn send_to_unknown_task_is_rejected() {
    let h = harness(vec![]);
    let outcome = h
        .bus
        .invoke_value(
            "task:send",
            "call-send",
            SYSTEM_CALLER,
            &json!({ "receiverId": "ghost", "message": "anyone?" }),
        )
        .await;
    assert_eq!(outcome.tag(), OutcomeTag::Error);
    assert!(outcome.failure_message().unwrap().contains("not found"));
}

#[tokio::test]
async fn active_lists_only_running_tasks() {
    let h = harness_with_delay(vec![vec![final_chunk("x")]], Duration::from_millis(100));
    let task_id = h.spawn("visible goal").await;

    let active = h
        .bus
        .invoke_value("task:active", "call-active", SYSTEM_CALLER, &json!({}))
        .await
        .into_value()
        .unwrap();
    assert_eq!(active["count"], 1);
    assert_eq!(active["tasks"][0]["taskId"], task_id.as_str());
    assert_eq!(active["tasks"][0]["goal"], "visible goal");
    assert_eq!(active["tasks"][0]["messageCount"], 2);

    h.wait_for_exit(&task_id).await;
    let active = h
        .bus
        .invoke_value("task:active", "call-active", SYSTEM_CALLER, &json!({}))
        .await
        .into_value()
        .unwrap();
    assert_eq!(active["count"], 0);
}

#[tokio::test]
async fn failed_model_call_fails_the_task_and_notifies_the_user() {
    // No providers at all: model:listLLM returns an empty table and the
    // loop cannot select a model.
    let bus = Bus::new().unwrap();
    register_ledger(&bus, Arc::new(NullLedger)).unwrap();
    register_model_layer(&bus, ModelLayer::new()).unwrap();

    let frames: Arc<Mutex<Vec<Frame>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = frames.clone();
    bus.register(
        AbilityDescriptor::new(
            "shell:send",
            "capture stream frames",
            json!({ "type": "object" }),
            json!({ "type": "object" }),
        )
        .unwrap(),
        handler_fn(move |call, input| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push((
                    call.caller_id,
                    input["content"].as_str().unwrap_or("").to_string(),
                    input["index"].as_i64().unwrap_or(0),
                    input["messageId"].as_str().unwrap_or("").to_string(),
                ));
                Ok(json!({ "success": true }))
            }
        }),
    )
    .unwrap();
    let manager = register_task_manager(&bus).unwrap();

    let task_id = bus
        .invoke_value(
            "task:spawn",
            "call-spawn",
            SYSTEM_CALLER,
            &json!({ "goal": "doomed" }),
        )
        .await
        .into_value()
        .unwrap()["taskId"]
        .as_str()
        .unwrap()
        .to_string();

    for _ in 0..500 {
        if let Some(snap) = manager.snapshot(&task_id) {
            if snap.task.completion_status.is_some() && !snap.is_running {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let snap = manager.snapshot(&task_id).unwrap();
    let status = snap.task.completion_status.unwrap();
    assert!(status.starts_with("failed: "), "status was {status}");
    assert!(status.contains("no LLM providers"));

    // The user got a final error chunk with the -1 terminator.
    let frames = frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert!(frames[0].1.starts_with("Error: "));
    assert_eq!(frames[0].2, -1);
}
