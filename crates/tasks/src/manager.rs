//! The task manager: in-memory task state and the `task:*` abilities.
//!
//! All mutations of one task's state happen under its slot mutex and
//! the mutex is never held across an await, so they appear atomic to
//! every other observer of that task. `is_running` is flipped on by
//! whichever ability schedules a run-loop (spawn or send) and cleared
//! by the loop itself on exit.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::{json, Value};

use colony_bus::{typed_handler_fn, Bus};
use colony_domain::ability::{AbilityDescriptor, AbilityError};
use colony_domain::chat::ChatMessage;
use colony_domain::message::{Role, TaskMessage};
use colony_domain::task::Task;
use colony_domain::error::Result;

use crate::run_loop;

/// System prompt given to tasks spawned without an explicit one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a task agent inside the Colony runtime. \
Work toward the goal you were given, using the available tools where they help. \
When the goal is accomplished, reply with your final answer and no tool calls.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct TaskState {
    task: Task,
    messages: Vec<TaskMessage>,
    is_running: bool,
    goal: String,
    last_activity_time: DateTime<Utc>,
}

struct TaskSlot {
    state: Mutex<TaskState>,
}

/// A point-in-time copy of one task's working set.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub task: Task,
    pub messages: Vec<TaskMessage>,
    pub is_running: bool,
    pub goal: String,
    pub last_activity_time: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TaskManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TaskManager {
    bus: Weak<Bus>,
    tasks: RwLock<HashMap<String, Arc<TaskSlot>>>,
}

impl TaskManager {
    fn new(bus: &Arc<Bus>) -> Self {
        Self {
            bus: Arc::downgrade(bus),
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn bus(&self) -> Option<Arc<Bus>> {
        self.bus.upgrade()
    }

    fn slot(&self, task_id: &str) -> Option<Arc<TaskSlot>> {
        self.tasks.read().get(task_id).cloned()
    }

    /// A copy of the task's full working set, if the task exists.
    pub fn snapshot(&self, task_id: &str) -> Option<TaskSnapshot> {
        let slot = self.slot(task_id)?;
        let st = slot.state.lock();
        Some(TaskSnapshot {
            task: st.task.clone(),
            messages: st.messages.clone(),
            is_running: st.is_running,
            goal: st.goal.clone(),
            last_activity_time: st.last_activity_time,
        })
    }

    pub(crate) fn completion_status(
        &self,
        task_id: &str,
    ) -> std::result::Result<Option<String>, String> {
        let slot = self
            .slot(task_id)
            .ok_or_else(|| format!("Task {task_id} not found"))?;
        let st = slot.state.lock();
        Ok(st.task.completion_status.clone())
    }

    /// The task's message log mapped to provider chat messages.
    pub(crate) fn chat_messages(
        &self,
        task_id: &str,
    ) -> std::result::Result<Vec<ChatMessage>, String> {
        let slot = self
            .slot(task_id)
            .ok_or_else(|| format!("Task {task_id} not found"))?;
        let st = slot.state.lock();
        Ok(st
            .messages
            .iter()
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect())
    }

    /// Append a message to the task's log and persist it through the
    /// ledger. `last_activity_time` advances on every append.
    pub(crate) async fn append_message(
        &self,
        task_id: &str,
        role: Role,
        content: &str,
    ) -> std::result::Result<TaskMessage, String> {
        let slot = self
            .slot(task_id)
            .ok_or_else(|| format!("Task {task_id} not found"))?;
        let message = TaskMessage::new(task_id, role, content);
        {
            let mut st = slot.state.lock();
            st.messages.push(message.clone());
            st.last_activity_time = Utc::now();
            st.task.updated_at = st.last_activity_time;
        }
        self.persist_message(&message).await?;
        Ok(message)
    }

    /// Set the terminal status if it is still unset. Returns whether
    /// this call performed the transition — a status once set is never
    /// replaced.
    pub(crate) fn try_finish(&self, task_id: &str, status: &str) -> bool {
        let Some(slot) = self.slot(task_id) else {
            return false;
        };
        let mut st = slot.state.lock();
        if st.task.completion_status.is_some() {
            return false;
        }
        st.task.completion_status = Some(status.to_string());
        st.task.updated_at = Utc::now();
        true
    }

    pub(crate) fn set_not_running(&self, task_id: &str) {
        if let Some(slot) = self.slot(task_id) {
            slot.state.lock().is_running = false;
        }
    }

    // ── Ledger plumbing (all through the bus) ──────────────────────

    async fn ledger_write(
        &self,
        ability: &str,
        caller_id: &str,
        payload: Value,
    ) -> std::result::Result<(), String> {
        let bus = self.bus().ok_or("bus has been dropped")?;
        let outcome = bus
            .invoke_value(
                ability,
                &uuid::Uuid::new_v4().to_string(),
                caller_id,
                &payload,
            )
            .await;
        if outcome.is_success() {
            Ok(())
        } else {
            Err(format!(
                "{ability}: {}",
                outcome.failure_message().unwrap_or("unknown failure")
            ))
        }
    }

    pub(crate) async fn persist_message(
        &self,
        message: &TaskMessage,
    ) -> std::result::Result<(), String> {
        self.ledger_write("ldg:msg:save", &message.task_id, json!({ "message": message }))
            .await
    }

    pub(crate) async fn persist_task(&self, task_id: &str) -> std::result::Result<(), String> {
        let task = {
            let slot = self
                .slot(task_id)
                .ok_or_else(|| format!("Task {task_id} not found"))?;
            let st = slot.state.lock();
            st.task.clone()
        };
        self.ledger_write("ldg:task:save", task_id, json!({ "task": task }))
            .await
    }

    // ── Scheduling ─────────────────────────────────────────────────

    fn schedule_loop(self: &Arc<Self>, task_id: String) {
        let manager = self.clone();
        tokio::spawn(async move {
            run_loop::run(manager, task_id).await;
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ability inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpawnInput {
    goal: String,
    #[serde(default)]
    parent_task_id: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendInput {
    receiver_id: String,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelInput {
    task_id: String,
    reason: String,
}

#[derive(Deserialize)]
struct ActiveInput {
    #[serde(default = "d_limit")]
    limit: usize,
}

fn d_limit() -> usize {
    100
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn infra(e: String) -> AbilityError {
    AbilityError::failure(e)
}

/// Register `task:spawn`, `task:send`, `task:cancel` and `task:active`;
/// returns the manager handle the assembly keeps for shutdown and
/// inspection.
pub fn register_task_manager(bus: &Arc<Bus>) -> Result<Arc<TaskManager>> {
    let manager = Arc::new(TaskManager::new(bus));

    // ── task:spawn ─────────────────────────────────────────────────
    let m = manager.clone();
    bus.register(
        AbilityDescriptor::new(
            "task:spawn",
            "Create a new task and start its run-loop",
            json!({
                "type": "object",
                "properties": {
                    "goal": { "type": "string", "minLength": 1 },
                    "parentTaskId": { "type": "string" },
                    "systemPrompt": { "type": "string" }
                },
                "required": ["goal"]
            }),
            json!({
                "type": "object",
                "properties": { "taskId": { "type": "string" } }
            }),
        )?,
        typed_handler_fn(move |_call, input: SpawnInput| {
            let m = m.clone();
            async move {
                let task = Task::new(
                    input.parent_task_id,
                    input
                        .system_prompt
                        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
                );
                let task_id = task.id.clone();

                let system_msg = TaskMessage::new(
                    task_id.as_str(),
                    Role::System,
                    task.system_prompt.as_str(),
                );
                let goal_msg =
                    TaskMessage::new(task_id.as_str(), Role::User, input.goal.as_str());

                m.ledger_write("ldg:task:save", &task_id, json!({ "task": &task }))
                    .await
                    .map_err(infra)?;
                m.persist_message(&system_msg).await.map_err(infra)?;
                m.persist_message(&goal_msg).await.map_err(infra)?;

                let now = Utc::now();
                let slot = Arc::new(TaskSlot {
                    state: Mutex::new(TaskState {
                        task,
                        messages: vec![system_msg, goal_msg],
                        is_running: true,
                        goal: input.goal,
                        last_activity_time: now,
                    }),
                });
                m.tasks.write().insert(task_id.clone(), slot);

                tracing::info!(task_id = %task_id, "task spawned");
                m.schedule_loop(task_id.clone());
                Ok(json!({ "taskId": task_id }))
            }
        }),
    )?;

    // ── task:send ──────────────────────────────────────────────────
    let m = manager.clone();
    bus.register(
        AbilityDescriptor::new(
            "task:send",
            "Deliver a user message to an existing task",
            json!({
                "type": "object",
                "properties": {
                    "receiverId": { "type": "string" },
                    "message": { "type": "string", "minLength": 1 }
                },
                "required": ["receiverId", "message"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "delivered": { "type": "boolean" },
                    "messageId": { "type": "string" }
                }
            }),
        )?,
        typed_handler_fn(move |_call, input: SendInput| {
            let m = m.clone();
            async move {
                let receiver_id = input.receiver_id;
                let slot = m.slot(&receiver_id).ok_or_else(|| {
                    AbilityError::domain(format!("Task {receiver_id} not found"))
                })?;
                if slot.state.lock().task.completion_status.is_some() {
                    return Err(AbilityError::domain(format!(
                        "Task {receiver_id} is already completed"
                    )));
                }

                let message = m
                    .append_message(&receiver_id, Role::User, &input.message)
                    .await
                    .map_err(infra)?;

                // Wake the task unless a loop is already in flight; a
                // running loop picks the message up on its next
                // iteration by re-reading the log.
                let should_schedule = {
                    let mut st = slot.state.lock();
                    if !st.is_running && st.task.completion_status.is_none() {
                        st.is_running = true;
                        true
                    } else {
                        false
                    }
                };
                if should_schedule {
                    m.schedule_loop(receiver_id.clone());
                }

                Ok(json!({ "delivered": true, "messageId": message.id }))
            }
        }),
    )?;

    // ── task:cancel ────────────────────────────────────────────────
    let m = manager.clone();
    bus.register(
        AbilityDescriptor::new(
            "task:cancel",
            "Cancel a task; its run-loop stops at the next suspension point",
            json!({
                "type": "object",
                "properties": {
                    "taskId": { "type": "string" },
                    "reason": { "type": "string" }
                },
                "required": ["taskId", "reason"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "taskId": { "type": "string" },
                    "status": { "type": "string" }
                }
            }),
        )?,
        typed_handler_fn(move |_call, input: CancelInput| {
            let m = m.clone();
            async move {
                let task_id = input.task_id;
                let slot = m.slot(&task_id).ok_or_else(|| {
                    AbilityError::domain(format!("Task {task_id} not found"))
                })?;

                let (changed, status) = {
                    let mut st = slot.state.lock();
                    match &st.task.completion_status {
                        None => {
                            st.task.completion_status = Some("cancelled".to_string());
                            st.task.updated_at = Utc::now();
                            (true, "cancelled".to_string())
                        }
                        // Cancelling a terminated task is a no-op.
                        Some(existing) => (false, existing.clone()),
                    }
                };

                if changed {
                    tracing::info!(task_id = %task_id, reason = %input.reason, "task cancelled");
                    if let Err(e) = m.persist_task(&task_id).await {
                        tracing::warn!(task_id = %task_id, error = %e, "cancel persist failed");
                    }
                }

                Ok(json!({ "taskId": task_id, "status": status }))
            }
        }),
    )?;

    // ── task:active ────────────────────────────────────────────────
    let m = manager.clone();
    bus.register(
        AbilityDescriptor::new(
            "task:active",
            "List tasks whose run has not terminated",
            json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "minimum": 1 }
                }
            }),
            json!({
                "type": "object",
                "properties": {
                    "tasks": { "type": "array" },
                    "count": { "type": "integer" }
                }
            }),
        )?,
        typed_handler_fn(move |_call, input: ActiveInput| {
            let m = m.clone();
            async move {
                let slots: Vec<Arc<TaskSlot>> = m.tasks.read().values().cloned().collect();
                let mut active: Vec<Value> = slots
                    .iter()
                    .filter_map(|slot| {
                        let st = slot.state.lock();
                        if st.task.completion_status.is_some() {
                            return None;
                        }
                        Some(json!({
                            "taskId": st.task.id,
                            "goal": st.goal,
                            "parentTaskId": st.task.parent_task_id,
                            "messageCount": st.messages.len(),
                            "createdAt": st.task.created_at,
                            "lastActivityTime": st.last_activity_time,
                        }))
                    })
                    .collect();
                active.sort_by(|a, b| {
                    let key = |v: &Value| {
                        (
                            v["createdAt"].as_str().unwrap_or("").to_string(),
                            v["taskId"].as_str().unwrap_or("").to_string(),
                        )
                    };
                    key(a).cmp(&key(b))
                });
                active.truncate(input.limit);

                Ok(json!({ "count": active.len(), "tasks": active }))
            }
        }),
    )?;

    Ok(manager)
}
