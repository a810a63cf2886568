//! The `shell:send` ability — the only way any component talks to users.
//!
//! The invoking `callerId` is the implicit task id: whatever task the
//! call is made on behalf of is the stream the chunk lands on. With no
//! active subscriber the call reports `success: false`, which callers
//! treat as advisory.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use colony_bus::{typed_handler_fn, Bus};
use colony_domain::ability::AbilityDescriptor;
use colony_domain::error::Result;

use crate::subscribers::{StreamFrame, SubscriberTable};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShellSendInput {
    content: String,
    message_id: String,
    index: i64,
}

pub fn register_shell(bus: &Bus, table: Arc<SubscriberTable>) -> Result<()> {
    bus.register(
        AbilityDescriptor::new(
            "shell:send",
            "Relay one content chunk to the calling task's stream subscriber",
            json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string" },
                    "messageId": { "type": "string" },
                    "index": { "type": "integer" }
                },
                "required": ["content", "messageId", "index"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "success": { "type": "boolean" },
                    "error": { "type": "string" }
                }
            }),
        )?,
        typed_handler_fn(move |call, input: ShellSendInput| {
            let table = table.clone();
            async move {
                let task_id = call.caller_id;

                let delivered = table.dispatch(
                    &task_id,
                    StreamFrame::Content {
                        task_id: task_id.clone(),
                        message_id: input.message_id.clone(),
                        index: input.index,
                        content: input.content,
                    },
                );
                if !delivered {
                    return Ok(json!({
                        "success": false,
                        "error": format!("no active subscriber for task {task_id}"),
                    }));
                }

                if input.index < 0 {
                    table.dispatch(
                        &task_id,
                        StreamFrame::MessageComplete {
                            task_id: task_id.clone(),
                            message_id: input.message_id,
                        },
                    );
                }

                Ok(json!({ "success": true }))
            }
        }),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
