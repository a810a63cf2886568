//! The think/act loop executed on behalf of one task.
//!
//! Each iteration: check the completion status, pick a model, rebuild
//! the tool catalog, run `model:llm` with `streamToUser` set (chunks
//! reach the subscriber while the call is in flight), append the
//! assistant message, dispatch any tool calls, repeat. A response with
//! no tool calls commits `"success"` — unless a cancellation landed
//! first, in which case the cancelled status stands.

use std::sync::Arc;

use serde_json::json;

use colony_bus::Bus;
use colony_domain::ability::InvokeOutcome;
use colony_domain::message::Role;

use crate::catalog;
use crate::manager::TaskManager;

fn new_call_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) async fn run(manager: Arc<TaskManager>, task_id: String) {
    tracing::debug!(task_id = %task_id, "run-loop started");
    if let Err(reason) = drive(&manager, &task_id).await {
        fail(&manager, &task_id, &reason).await;
    }
    manager.set_not_running(&task_id);
    tracing::debug!(task_id = %task_id, "run-loop finished");
}

async fn drive(manager: &TaskManager, task_id: &str) -> Result<(), String> {
    let bus = manager.bus().ok_or("bus has been dropped")?;

    loop {
        // Cancellation (or any other terminal status) is observed here,
        // between round trips — never mid-flight.
        if manager.completion_status(task_id)?.is_some() {
            return Ok(());
        }

        let (provider, model) = select_model(&bus, task_id).await?;
        let tools = catalog::build_tool_catalog(&bus, task_id).await?;
        let messages = manager.chat_messages(task_id)?;

        let request = json!({
            "messages": messages,
            "provider": provider,
            "model": model,
            "streamToUser": true,
            "tools": tools,
        });
        let response = match bus
            .invoke_value("model:llm", &new_call_id(), task_id, &request)
            .await
        {
            InvokeOutcome::Success { value } => value,
            other => {
                return Err(other
                    .failure_message()
                    .unwrap_or("model:llm failed")
                    .to_string())
            }
        };

        let content = response["content"].as_str().unwrap_or_default();
        manager
            .append_message(task_id, Role::Assistant, content)
            .await?;

        let tool_calls = response["toolCalls"].as_array().cloned().unwrap_or_default();
        if tool_calls.is_empty() {
            if manager.try_finish(task_id, "success") {
                if let Err(e) = manager.persist_task(task_id).await {
                    tracing::warn!(task_id = %task_id, error = %e, "success persist failed");
                }
            }
            return Ok(());
        }

        for call in &tool_calls {
            let tool_name = call["name"].as_str().unwrap_or_default();
            let arguments = call["arguments"].as_str().unwrap_or("{}");
            let ability_id = catalog::tool_to_ability_name(tool_name);

            tracing::debug!(task_id = %task_id, ability = %ability_id, "dispatching tool call");
            let note = match bus
                .invoke(&ability_id, &new_call_id(), task_id, arguments)
                .await
            {
                InvokeOutcome::Success { value } => {
                    format!("Tool {ability_id} result: {value}")
                }
                other => format!(
                    "Tool {ability_id} failed: {}",
                    other.failure_message().unwrap_or("unknown failure")
                ),
            };
            manager
                .append_message(task_id, Role::Assistant, &note)
                .await?;
        }
    }
}

/// Deterministic default model selection: the first provider of
/// `model:listLLM`'s name-sorted output, and its first advertised model.
async fn select_model(bus: &Bus, task_id: &str) -> Result<(String, String), String> {
    let listed = bus
        .invoke_value("model:listLLM", &new_call_id(), task_id, &json!({}))
        .await
        .into_value()
        .ok_or("model:listLLM failed")?;

    let first = listed["providers"]
        .as_array()
        .and_then(|a| a.first())
        .cloned()
        .ok_or("no LLM providers available")?;

    let provider = first["providerName"]
        .as_str()
        .ok_or("malformed model:listLLM output")?
        .to_string();
    let model = first["models"]
        .as_array()
        .and_then(|a| a.first())
        .and_then(|m| m.as_str())
        .ok_or("provider advertises no models")?
        .to_string();

    Ok((provider, model))
}

/// Terminal failure: commit `failed: <reason>` (unless a terminal
/// status already stands) and tell the user with a final error chunk.
async fn fail(manager: &TaskManager, task_id: &str, reason: &str) {
    tracing::warn!(task_id = %task_id, error = %reason, "run-loop failed");

    if manager.try_finish(task_id, &format!("failed: {reason}")) {
        if let Err(e) = manager.persist_task(task_id).await {
            tracing::warn!(task_id = %task_id, error = %e, "failure persist failed");
        }
    }

    if let Some(bus) = manager.bus() {
        let payload = json!({
            "content": format!("Error: {reason}"),
            "messageId": uuid::Uuid::new_v4().to_string(),
            "index": -1,
        });
        // Advisory: with no subscriber this is a no-op.
        let _ = bus
            .invoke_value("shell:send", &new_call_id(), task_id, &payload)
            .await;
    }
}
