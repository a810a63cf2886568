//! Anthropic-native adapter.
//!
//! Implements the Messages API including tool use and streaming. The
//! consecutive system-role prefix of the message list moves into the
//! top-level `system` field; later system messages are folded in as
//! user turns. Embeddings are not offered by this API and return a
//! domain error.

use serde_json::Value;
use std::collections::HashMap;

use colony_domain::chat::{ChatMessage, Completion, CompletionOptions, Embedding, ToolCall};
use colony_domain::config::ProviderConfig;
use colony_domain::error::{Error, Result};
use colony_domain::message::Role;
use colony_domain::stream::{BoxStream, CompletionChunk, ToolCallFragment, Usage};

use crate::traits::ProviderAdapter;
use crate::util::{from_reqwest, resolve_api_key};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Environment variable consulted when the configured API key is empty.
const ANTHROPIC_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// The Messages API requires `max_tokens`; used when the caller gave none.
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AnthropicAdapter {
    name: String,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn from_config(name: &str, cfg: &ProviderConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.api_key, Some(ANTHROPIC_KEY_ENV));

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            name: name.to_string(),
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }
        builder
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request body construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Split the leading consecutive system-role prefix off the message list.
fn split_system_prefix(messages: &[ChatMessage]) -> (Vec<&str>, &[ChatMessage]) {
    let boundary = messages
        .iter()
        .position(|m| m.role != Role::System)
        .unwrap_or(messages.len());
    let system: Vec<&str> = messages[..boundary]
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    (system, &messages[boundary..])
}

fn build_messages_body(
    model: &str,
    messages: &[ChatMessage],
    options: &CompletionOptions,
    stream: bool,
) -> Value {
    let (system_parts, rest) = split_system_prefix(messages);

    let api_messages: Vec<Value> = rest
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::Assistant => "assistant",
                // The API knows only user/assistant; a stray later
                // system message is delivered as a user turn.
                Role::User | Role::System => "user",
            };
            serde_json::json!({ "role": role, "content": m.content })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": model,
        "messages": api_messages,
        "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "stream": stream,
    });

    if !system_parts.is_empty() {
        body["system"] = Value::String(system_parts.join("\n\n"));
    }

    if !options.tools.is_empty() {
        let tools: Vec<Value> = options
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }
    if let Some(temp) = options.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if let Some(top_p) = options.top_p {
        body["top_p"] = serde_json::json!(top_p);
    }

    body
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens")?.as_u64()? as u32;
    let output = v.get("output_tokens")?.as_u64()? as u32;
    Some(Usage {
        prompt_tokens: input,
        completion_tokens: output,
        total_tokens: input + output,
    })
}

fn parse_completion(body: &Value) -> Completion {
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    if let Some(blocks) = body.get("content").and_then(|v| v.as_array()) {
        for block in blocks {
            match block.get("type").and_then(|v| v.as_str()).unwrap_or("") {
                "text" => {
                    if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                        content.push_str(t);
                    }
                }
                "tool_use" => {
                    let input = block.get("input").cloned().unwrap_or_else(|| {
                        Value::Object(Default::default())
                    });
                    tool_calls.push(ToolCall {
                        id: block
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string(),
                        name: block
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string(),
                        arguments: input.to_string(),
                    });
                }
                _ => {}
            }
        }
    }

    Completion {
        content,
        tool_calls,
        usage: body.get("usage").and_then(parse_usage),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-stream parser state: stashed usage and the content-block index →
/// tool-call id map (`input_json_delta` events carry only the index).
#[derive(Default)]
struct StreamState {
    usage: Option<Usage>,
    finished: bool,
    block_ids: HashMap<u64, String>,
}

fn parse_stream_data(data: &str, state: &mut StreamState) -> Vec<Result<CompletionChunk>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    match v.get("type").and_then(|v| v.as_str()).unwrap_or("") {
        "message_start" => {
            if let Some(msg) = v.get("message") {
                state.usage = msg.get("usage").and_then(parse_usage);
            }
            Vec::new()
        }

        "content_block_start" => {
            let index = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            let Some(block) = v.get("content_block") else {
                return Vec::new();
            };
            if block.get("type").and_then(|v| v.as_str()) != Some("tool_use") {
                return Vec::new();
            }
            let id = block
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let name = block
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            state.block_ids.insert(index, id.clone());
            vec![Ok(CompletionChunk {
                tool_call: Some(ToolCallFragment {
                    id: Some(id),
                    name,
                    arguments: String::new(),
                }),
                ..CompletionChunk::default()
            })]
        }

        "content_block_delta" => {
            let index = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            let Some(delta) = v.get("delta") else {
                return Vec::new();
            };
            match delta.get("type").and_then(|v| v.as_str()).unwrap_or("") {
                "text_delta" => match delta.get("text").and_then(|v| v.as_str()) {
                    Some(text) if !text.is_empty() => {
                        vec![Ok(CompletionChunk::content(text))]
                    }
                    _ => Vec::new(),
                },
                "input_json_delta" => {
                    match delta.get("partial_json").and_then(|v| v.as_str()) {
                        Some(partial) if !partial.is_empty() => {
                            vec![Ok(CompletionChunk {
                                tool_call: Some(ToolCallFragment {
                                    id: state.block_ids.get(&index).cloned(),
                                    name: String::new(),
                                    arguments: partial.to_string(),
                                }),
                                ..CompletionChunk::default()
                            })]
                        }
                        _ => Vec::new(),
                    }
                }
                _ => Vec::new(),
            }
        }

        "message_delta" => {
            // Output token count arrives here; merge into stashed usage.
            if let Some(output) = v
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(|v| v.as_u64())
            {
                if let Some(ref mut usage) = state.usage {
                    usage.completion_tokens = output as u32;
                    usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
                }
            }
            Vec::new()
        }

        "message_stop" => {
            if state.finished {
                return Vec::new();
            }
            state.finished = true;
            vec![Ok(CompletionChunk::finished(state.usage.take()))]
        }

        "error" => {
            let message = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string();
            vec![Err(Error::Provider {
                provider: "anthropic".into(),
                message,
            })]
        }

        // ping, content_block_stop and unknown event types.
        _ => Vec::new(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicAdapter {
    async fn complete_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<CompletionChunk>>> {
        let url = format!("{}/v1/messages", self.endpoint);
        let body = build_messages_body(model, messages, options, true);

        tracing::debug!(provider = %self.name, url = %url, "anthropic stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Api {
                provider: self.name.clone(),
                status: status.as_u16(),
                message: text,
            });
        }

        let mut state = StreamState::default();
        Ok(crate::sse::chunk_stream(resp, move |data| {
            parse_stream_data(data, &mut state)
        }))
    }

    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion> {
        let url = format!("{}/v1/messages", self.endpoint);
        let body = build_messages_body(model, messages, options, false);

        tracing::debug!(provider = %self.name, url = %url, "anthropic messages request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Api {
                provider: self.name.clone(),
                status: status.as_u16(),
                message: text,
            });
        }

        let body: Value = serde_json::from_str(&text)?;
        Ok(parse_completion(&body))
    }

    async fn embed(&self, _model: &str, _text: &str) -> Result<Embedding> {
        Err(Error::Provider {
            provider: self.name.clone(),
            message: "embeddings are not supported by the anthropic adapter".into(),
        })
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
