//! The `ldg:*` abilities — the bus face of the [`Ledger`](crate::Ledger)
//! contract. Components never hold a ledger reference; they invoke these.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use colony_bus::{typed_handler_fn, Bus};
use colony_domain::ability::{AbilityDescriptor, AbilityError};
use colony_domain::error::Result;
use colony_domain::message::TaskMessage;
use colony_domain::task::{CallRecord, Task};

use crate::{Ledger, TaskQuery};

fn ledger_err(e: colony_domain::Error) -> AbilityError {
    AbilityError::domain(format!("ledger: {e}"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskIdInput {
    task_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMessagesInput {
    task_id: String,
    #[serde(default = "d_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn d_limit() -> usize {
    100
}

#[derive(Deserialize)]
struct SaveTaskInput {
    task: Task,
}

#[derive(Deserialize)]
struct SaveCallInput {
    call: CallRecord,
}

#[derive(Deserialize)]
struct SaveMessageInput {
    message: TaskMessage,
}

fn task_id_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": { "taskId": { "type": "string" } },
        "required": ["taskId"]
    })
}

/// Register every `ldg:*` ability against the given ledger.
pub fn register_ledger(bus: &Bus, ledger: Arc<dyn Ledger>) -> Result<()> {
    // ── ldg:task:save ──────────────────────────────────────────────
    let l = ledger.clone();
    bus.register(
        AbilityDescriptor::new(
            "ldg:task:save",
            "Persist a task record",
            json!({
                "type": "object",
                "properties": { "task": { "type": "object" } },
                "required": ["task"]
            }),
            json!({ "type": "object", "properties": { "ok": { "type": "boolean" } } }),
        )?,
        typed_handler_fn(move |_call, input: SaveTaskInput| {
            let l = l.clone();
            async move {
                l.save_task(&input.task).await.map_err(ledger_err)?;
                Ok(json!({ "ok": true }))
            }
        }),
    )?;

    // ── ldg:task:get ───────────────────────────────────────────────
    let l = ledger.clone();
    bus.register(
        AbilityDescriptor::new(
            "ldg:task:get",
            "Fetch a task record by id",
            task_id_schema(),
            json!({ "type": "object", "properties": { "task": {} } }),
        )?,
        typed_handler_fn(move |_call, input: TaskIdInput| {
            let l = l.clone();
            async move {
                let task = l.get_task(&input.task_id).await.map_err(ledger_err)?;
                Ok(json!({ "task": task }))
            }
        }),
    )?;

    // ── ldg:task:query ─────────────────────────────────────────────
    let l = ledger.clone();
    bus.register(
        AbilityDescriptor::new(
            "ldg:task:query",
            "Query task records by status, parent and creation time",
            json!({
                "type": "object",
                "properties": {
                    "completionStatus": { "type": "string" },
                    "parentTaskId": { "type": "string" },
                    "createdAfter": { "type": "string" },
                    "createdBefore": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1 },
                    "offset": { "type": "integer", "minimum": 0 }
                }
            }),
            json!({
                "type": "object",
                "properties": { "tasks": { "type": "array" } }
            }),
        )?,
        typed_handler_fn(move |_call, query: TaskQuery| {
            let l = l.clone();
            async move {
                let tasks = l.query_tasks(&query).await.map_err(ledger_err)?;
                Ok(json!({ "tasks": tasks }))
            }
        }),
    )?;

    // ── ldg:call:save ──────────────────────────────────────────────
    let l = ledger.clone();
    bus.register(
        AbilityDescriptor::new(
            "ldg:call:save",
            "Persist a tool-invocation record",
            json!({
                "type": "object",
                "properties": { "call": { "type": "object" } },
                "required": ["call"]
            }),
            json!({ "type": "object", "properties": { "ok": { "type": "boolean" } } }),
        )?,
        typed_handler_fn(move |_call, input: SaveCallInput| {
            let l = l.clone();
            async move {
                l.save_call(&input.call).await.map_err(ledger_err)?;
                Ok(json!({ "ok": true }))
            }
        }),
    )?;

    // ── ldg:call:list ──────────────────────────────────────────────
    let l = ledger.clone();
    bus.register(
        AbilityDescriptor::new(
            "ldg:call:list",
            "List tool-invocation records for a task",
            task_id_schema(),
            json!({
                "type": "object",
                "properties": { "calls": { "type": "array" } }
            }),
        )?,
        typed_handler_fn(move |_call, input: TaskIdInput| {
            let l = l.clone();
            async move {
                let calls = l.list_calls(&input.task_id).await.map_err(ledger_err)?;
                Ok(json!({ "calls": calls }))
            }
        }),
    )?;

    // ── ldg:msg:save ───────────────────────────────────────────────
    let l = ledger.clone();
    bus.register(
        AbilityDescriptor::new(
            "ldg:msg:save",
            "Append a message to a task's log; returns the assigned id",
            json!({
                "type": "object",
                "properties": { "message": { "type": "object" } },
                "required": ["message"]
            }),
            json!({
                "type": "object",
                "properties": { "messageId": { "type": "string" } }
            }),
        )?,
        typed_handler_fn(move |_call, input: SaveMessageInput| {
            let l = l.clone();
            async move {
                let id = l.save_message(&input.message).await.map_err(ledger_err)?;
                Ok(json!({ "messageId": id }))
            }
        }),
    )?;

    // ── ldg:msg:list ───────────────────────────────────────────────
    let l = ledger;
    bus.register(
        AbilityDescriptor::new(
            "ldg:msg:list",
            "List messages for a task, oldest first",
            json!({
                "type": "object",
                "properties": {
                    "taskId": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1 },
                    "offset": { "type": "integer", "minimum": 0 }
                },
                "required": ["taskId"]
            }),
            json!({
                "type": "object",
                "properties": { "messages": { "type": "array" } }
            }),
        )?,
        typed_handler_fn(move |_call, input: ListMessagesInput| {
            let l = l.clone();
            async move {
                let messages = l
                    .list_messages(&input.task_id, input.limit, input.offset)
                    .await
                    .map_err(ledger_err)?;
                Ok(json!({ "messages": messages }))
            }
        }),
    )?;

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
