//! The model layer: provider table plus the uniform `model:*` abilities.
//!
//! Holds one adapter per configured provider, keyed by the operator's
//! chosen name. The advertised model list is authoritative — a request
//! for a (provider, model) pair that is not advertised is rejected
//! before any network call. When `streamToUser` is set, every streamed
//! content chunk is relayed through `shell:send` while the completion
//! is still running.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;

use colony_bus::{typed_handler_fn, Bus};
use colony_domain::ability::{AbilityDescriptor, AbilityError};
use colony_domain::chat::{ChatMessage, Completion, CompletionOptions, ToolDefinition};
use colony_domain::config::{AdapterKind, ModelEntry, ModelKind, ModelsConfig};
use colony_domain::error::{Error, Result};

use crate::anthropic::AnthropicAdapter;
use crate::assemble::ToolCallAssembler;
use crate::openai::OpenAiAdapter;
use crate::traits::ProviderAdapter;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProviderEntry {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub models: Vec<ModelEntry>,
}

impl ProviderEntry {
    fn advertises(&self, kind: ModelKind, name: &str) -> bool {
        self.models.iter().any(|m| m.kind == kind && m.name == name)
    }

    fn models_of(&self, kind: ModelKind) -> Vec<String> {
        self.models
            .iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.name.clone())
            .collect()
    }
}

/// Provider registry keyed by name. A `BTreeMap` so `model:listLLM`
/// output — and with it the run-loop's default model selection — is
/// deterministic.
#[derive(Default)]
pub struct ModelLayer {
    providers: BTreeMap<String, ProviderEntry>,
}

impl ModelLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate one adapter per configured provider.
    pub fn from_config(cfg: &ModelsConfig) -> Result<Self> {
        let mut layer = Self::new();
        for (name, pc) in &cfg.providers {
            let adapter: Arc<dyn ProviderAdapter> = match pc.adapter {
                AdapterKind::Openai | AdapterKind::Custom => {
                    Arc::new(OpenAiAdapter::from_config(name, pc)?)
                }
                AdapterKind::Anthropic => Arc::new(AnthropicAdapter::from_config(name, pc)?),
            };
            tracing::info!(provider = %name, kind = ?pc.adapter, "registered LLM provider");
            layer.insert(name.clone(), adapter, pc.models.clone());
        }
        Ok(layer)
    }

    /// Insert a provider entry directly (used by tests and embedders of
    /// the runtime that bring their own adapter).
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        adapter: Arc<dyn ProviderAdapter>,
        models: Vec<ModelEntry>,
    ) {
        self.providers
            .insert(name.into(), ProviderEntry { adapter, models });
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn get(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.get(name)
    }

    /// `[{providerName, models}]` for every provider advertising at
    /// least one model of `kind`, sorted by provider name.
    fn listing(&self, kind: ModelKind) -> Vec<serde_json::Value> {
        self.providers
            .iter()
            .filter_map(|(name, entry)| {
                let models = entry.models_of(kind);
                if models.is_empty() {
                    None
                } else {
                    Some(json!({ "providerName": name, "models": models }))
                }
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map a provider failure onto the user-facing domain error surface.
/// Provider errors are always carried as data, never thrown past the bus.
fn classify(e: Error) -> AbilityError {
    match e {
        Error::Api { status: 401, .. } => AbilityError::domain("Invalid API key"),
        Error::Api { status: 429, .. } => AbilityError::domain("Rate limit exceeded"),
        Error::Api {
            status: 400,
            message,
            ..
        } => AbilityError::domain(format!("Invalid request: {message}")),
        other => AbilityError::domain(other.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chunk relay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Relays streamed content to the task's subscriber via `shell:send`.
///
/// Keeps one chunk of lookahead so the final content chunk can be sent
/// with `index = -1`: chunk N is dispatched when chunk N+1 arrives, and
/// the buffered tail goes out as the terminator when the stream
/// finishes. Relay failures (no subscriber) are advisory and ignored.
struct ChunkRelay {
    bus: Arc<Bus>,
    task_id: String,
    message_id: String,
    pending: Option<String>,
    index: i64,
}

impl ChunkRelay {
    fn new(bus: Arc<Bus>, task_id: &str) -> Self {
        Self {
            bus,
            task_id: task_id.to_string(),
            message_id: uuid::Uuid::new_v4().to_string(),
            pending: None,
            index: 0,
        }
    }

    async fn push(&mut self, text: &str) {
        if let Some(prev) = self.pending.replace(text.to_string()) {
            let index = self.index;
            self.index += 1;
            self.send(prev, index).await;
        }
    }

    async fn finish(&mut self) {
        if let Some(last) = self.pending.take() {
            self.send(last, -1).await;
        }
    }

    async fn send(&self, content: String, index: i64) {
        let payload = json!({
            "content": content,
            "messageId": &self.message_id,
            "index": index,
        });
        let outcome = self
            .bus
            .invoke_value(
                "shell:send",
                &uuid::Uuid::new_v4().to_string(),
                &self.task_id,
                &payload,
            )
            .await;
        match outcome.into_value() {
            Some(v) if v["success"] == json!(true) => {}
            _ => {
                // No subscriber (or no transport at all): the run
                // continues regardless.
                tracing::debug!(task_id = %self.task_id, index, "chunk relay had no receiver");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ability inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LlmInput {
    messages: Vec<ChatMessage>,
    provider: String,
    model: String,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    stream_to_user: bool,
    #[serde(default)]
    tools: Vec<ToolDefinition>,
}

#[derive(Deserialize)]
struct EmbedInput {
    provider: String,
    model: String,
    text: String,
}

fn llm_input_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "messages": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "role": { "type": "string", "enum": ["system", "user", "assistant"] },
                        "content": { "type": "string" }
                    },
                    "required": ["role", "content"]
                }
            },
            "provider": { "type": "string" },
            "model": { "type": "string" },
            "temperature": { "type": "number" },
            "maxTokens": { "type": "integer", "minimum": 1 },
            "topP": { "type": "number" },
            "streamToUser": { "type": "boolean" },
            "tools": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "description": { "type": "string" },
                        "parameters": { "type": "object" }
                    },
                    "required": ["name"]
                }
            }
        },
        "required": ["messages", "provider", "model"]
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_llm(
    layer: &ModelLayer,
    bus: &Weak<Bus>,
    caller_id: &str,
    input: LlmInput,
) -> std::result::Result<Completion, AbilityError> {
    let entry = layer.get(&input.provider).ok_or_else(|| {
        AbilityError::domain(format!("unknown provider '{}'", input.provider))
    })?;
    if !entry.advertises(ModelKind::Llm, &input.model) {
        return Err(AbilityError::domain(format!(
            "model '{}' is not advertised by provider '{}'",
            input.model, input.provider
        )));
    }

    let options = CompletionOptions {
        tools: input.tools,
        temperature: input.temperature,
        max_tokens: input.max_tokens,
        top_p: input.top_p,
    };

    if !input.stream_to_user {
        return entry
            .adapter
            .complete(&input.model, &input.messages, &options)
            .await
            .map_err(classify);
    }

    let bus = bus
        .upgrade()
        .ok_or_else(|| AbilityError::failure("bus has been dropped"))?;
    let mut relay = ChunkRelay::new(bus, caller_id);

    let mut stream = entry
        .adapter
        .complete_stream(&input.model, &input.messages, &options)
        .await
        .map_err(classify)?;

    let mut content = String::new();
    let mut assembler = ToolCallAssembler::new();
    let mut usage = None;

    while let Some(item) = stream.next().await {
        // A mid-stream failure leaves the subscriber with a truncated
        // message and no terminator; consumers must guard for that.
        let chunk = item.map_err(classify)?;
        if let Some(fragment) = chunk.tool_call {
            assembler.push(fragment);
        }
        if !chunk.content.is_empty() {
            content.push_str(&chunk.content);
            relay.push(&chunk.content).await;
        }
        if chunk.finished {
            usage = chunk.usage;
            relay.finish().await;
            break;
        }
    }

    Ok(Completion {
        content,
        tool_calls: assembler.finish(),
        usage,
    })
}

/// Register `model:llm`, `model:listLLM`, `model:listEmbed` and
/// `model:embed` against the given provider table.
pub fn register_model_layer(bus: &Arc<Bus>, layer: ModelLayer) -> Result<()> {
    let layer = Arc::new(layer);

    // ── model:llm ──────────────────────────────────────────────────
    let l = layer.clone();
    let weak = Arc::downgrade(bus);
    bus.register(
        AbilityDescriptor::new(
            "model:llm",
            "Run a chat completion; optionally stream chunks to the task's subscriber",
            llm_input_schema(),
            json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string" },
                    "toolCalls": { "type": "array" },
                    "usage": { "type": "object" }
                }
            }),
        )?,
        typed_handler_fn(move |call, input: LlmInput| {
            let l = l.clone();
            let weak = weak.clone();
            async move {
                let completion = run_llm(&l, &weak, &call.caller_id, input).await?;
                Ok(json!({
                    "content": completion.content,
                    "toolCalls": completion.tool_calls,
                    "usage": completion.usage,
                }))
            }
        }),
    )?;

    // ── model:listLLM ──────────────────────────────────────────────
    let l = layer.clone();
    bus.register(
        AbilityDescriptor::new(
            "model:listLLM",
            "List advertised chat models by provider",
            json!({ "type": "object", "properties": {} }),
            json!({
                "type": "object",
                "properties": { "providers": { "type": "array" } }
            }),
        )?,
        typed_handler_fn(move |_call, _input: serde_json::Value| {
            let l = l.clone();
            async move { Ok(json!({ "providers": l.listing(ModelKind::Llm) })) }
        }),
    )?;

    // ── model:listEmbed ────────────────────────────────────────────
    let l = layer.clone();
    bus.register(
        AbilityDescriptor::new(
            "model:listEmbed",
            "List advertised embedding models by provider",
            json!({ "type": "object", "properties": {} }),
            json!({
                "type": "object",
                "properties": { "providers": { "type": "array" } }
            }),
        )?,
        typed_handler_fn(move |_call, _input: serde_json::Value| {
            let l = l.clone();
            async move { Ok(json!({ "providers": l.listing(ModelKind::Embed) })) }
        }),
    )?;

    // ── model:embed ────────────────────────────────────────────────
    let l = layer;
    bus.register(
        AbilityDescriptor::new(
            "model:embed",
            "Generate an embedding vector for one text",
            json!({
                "type": "object",
                "properties": {
                    "provider": { "type": "string" },
                    "model": { "type": "string" },
                    "text": { "type": "string" }
                },
                "required": ["provider", "model", "text"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "vector": { "type": "array" },
                    "dimensions": { "type": "integer" },
                    "usage": { "type": "object" }
                }
            }),
        )?,
        typed_handler_fn(move |_call, input: EmbedInput| {
            let l = l.clone();
            async move {
                let entry = l.get(&input.provider).ok_or_else(|| {
                    AbilityError::domain(format!("unknown provider '{}'", input.provider))
                })?;
                if !entry.advertises(ModelKind::Embed, &input.model) {
                    return Err(AbilityError::domain(format!(
                        "embedding model '{}' is not advertised by provider '{}'",
                        input.model, input.provider
                    )));
                }
                let embedding = entry
                    .adapter
                    .embed(&input.model, &input.text)
                    .await
                    .map_err(classify)?;
                serde_json::to_value(embedding).map_err(AbilityError::from)
            }
        }),
    )?;

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
