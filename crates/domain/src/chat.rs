//! Provider-agnostic chat completion types.
//!
//! Every adapter converts between these and its vendor wire format; the
//! model layer and the run-loop never see provider-specific shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Role;
use crate::stream::Usage;

/// A message as sent to an LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

/// Sampling and tool options for a completion request.
/// Unknown provider-side fields are never surfaced here.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

/// A fully assembled tool call emitted by the model.
///
/// `arguments` stays a raw text accumulation of provider fragments; it is
/// not parsed as JSON until the tool is actually invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// The result of draining one completion stream (or of the non-streaming
/// path, which is equivalent).
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

/// A single embedding result.
#[derive(Debug, Clone, Serialize)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub dimensions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}
