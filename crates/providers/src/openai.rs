//! OpenAI-compatible adapter.
//!
//! Covers the OpenAI API itself and, via the `custom` adapter kind, any
//! endpoint that follows the chat-completions contract (Ollama, vLLM,
//! LM Studio, Together, ...).

use serde_json::Value;
use std::collections::HashMap;

use colony_domain::chat::{ChatMessage, Completion, CompletionOptions, Embedding, ToolCall};
use colony_domain::config::{AdapterKind, ProviderConfig};
use colony_domain::error::{Error, Result};
use colony_domain::message::Role;
use colony_domain::stream::{BoxStream, CompletionChunk, ToolCallFragment, Usage};

use crate::traits::ProviderAdapter;
use crate::util::{from_reqwest, resolve_api_key};

/// Environment variable consulted when the configured API key is empty.
const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiAdapter {
    name: String,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiAdapter {
    /// Build the adapter from a provider config entry.
    ///
    /// Only the `openai` adapter kind reads `OPENAI_API_KEY` as a
    /// fallback; `custom` endpoints use exactly the configured key.
    pub fn from_config(name: &str, cfg: &ProviderConfig) -> Result<Self> {
        let env = match cfg.adapter {
            AdapterKind::Openai => Some(OPENAI_KEY_ENV),
            _ => None,
        };
        let api_key = resolve_api_key(&cfg.api_key, env);

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
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        let resp = self
            .authed_post(url)
            .json(body)
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
        serde_json::from_str(&text).map_err(Error::Json)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request body construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn build_chat_body(
    model: &str,
    messages: &[ChatMessage],
    options: &CompletionOptions,
    stream: bool,
) -> Value {
    let messages: Vec<Value> = messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": role_to_str(m.role),
                "content": m.content,
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
        "stream": stream,
    });

    if !options.tools.is_empty() {
        let tools: Vec<Value> = options
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }
    if let Some(temp) = options.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if let Some(max) = options.max_tokens {
        body["max_tokens"] = serde_json::json!(max);
    }
    if let Some(top_p) = options.top_p {
        body["top_p"] = serde_json::json!(top_p);
    }
    if stream {
        body["stream_options"] = serde_json::json!({"include_usage": true});
    }
    body
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

fn parse_completion(provider: &str, body: &Value) -> Result<Completion> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.to_string(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Provider {
        provider: provider.to_string(),
        message: "no message in choice".into(),
    })?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| {
                    let func = tc.get("function")?;
                    Some(ToolCall {
                        id: tc.get("id")?.as_str()?.to_string(),
                        name: func.get("name")?.as_str()?.to_string(),
                        arguments: func
                            .get("arguments")
                            .and_then(|v| v.as_str())
                            .unwrap_or("{}")
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = body.get("usage").and_then(parse_usage);

    Ok(Completion {
        content,
        tool_calls,
        usage,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-stream parser state: stashed usage and the delta-index → call-id
/// map (continuation deltas carry only `index`).
#[derive(Default)]
struct StreamState {
    usage: Option<Usage>,
    finished: bool,
    call_ids: HashMap<u64, String>,
}

fn parse_stream_data(data: &str, state: &mut StreamState) -> Vec<Result<CompletionChunk>> {
    if data.trim() == "[DONE]" {
        if state.finished {
            return Vec::new();
        }
        state.finished = true;
        return vec![Ok(CompletionChunk::finished(state.usage.take()))];
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    // Any chunk may carry usage (stream_options.include_usage puts it in
    // a trailing choice-less chunk); stash it for the finished chunk.
    if let Some(usage) = v.get("usage").and_then(parse_usage) {
        state.usage = Some(usage);
    }

    let Some(choice) = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
    else {
        return Vec::new();
    };
    let delta = choice.get("delta").unwrap_or(&Value::Null);

    let mut chunks = Vec::new();

    if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tc_arr {
            let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            let id = match tc.get("id").and_then(|v| v.as_str()) {
                Some(id) => {
                    state.call_ids.insert(index, id.to_string());
                    Some(id.to_string())
                }
                None => state.call_ids.get(&index).cloned(),
            };
            let func = tc.get("function").unwrap_or(&Value::Null);
            let fragment = ToolCallFragment {
                id,
                name: func
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                arguments: func
                    .get("arguments")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
            };
            chunks.push(Ok(CompletionChunk {
                tool_call: Some(fragment),
                ..CompletionChunk::default()
            }));
        }
    }

    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            chunks.push(Ok(CompletionChunk::content(text)));
        }
    }

    chunks
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn complete_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<CompletionChunk>>> {
        let url = format!("{}/chat/completions", self.endpoint);
        let body = build_chat_body(model, messages, options, true);

        tracing::debug!(provider = %self.name, url = %url, "openai stream request");

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
        let url = format!("{}/chat/completions", self.endpoint);
        let body = build_chat_body(model, messages, options, false);

        tracing::debug!(provider = %self.name, url = %url, "openai chat request");

        let resp = self.post_json(&url, &body).await?;
        parse_completion(&self.name, &resp)
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Embedding> {
        let url = format!("{}/embeddings", self.endpoint);
        let body = serde_json::json!({ "model": model, "input": [text] });

        let resp = self.post_json(&url, &body).await?;

        let vector: Vec<f32> = resp
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|a| a.first())
            .and_then(|item| item.get("embedding"))
            .and_then(|e| e.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect()
            })
            .ok_or_else(|| Error::Provider {
                provider: self.name.clone(),
                message: "missing 'data[0].embedding' in embeddings response".into(),
            })?;

        Ok(Embedding {
            dimensions: vector.len(),
            vector,
            usage: resp.get("usage").and_then(parse_usage),
        })
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
