use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One incremental unit of a completion stream.
///
/// A chunk may carry text content, a tool-call fragment, or both; the
/// `finished` chunk is the only one that may carry usage counts. Streams
/// are lazy, finite and non-restartable: once a consumer stops pulling,
/// the remaining chunks are gone.
#[derive(Debug, Clone, Default)]
pub struct CompletionChunk {
    /// Incremental text content; possibly empty.
    pub content: String,
    /// Partial tool-call data, if this chunk carries any.
    pub tool_call: Option<ToolCallFragment>,
    /// True on the terminating chunk of the stream.
    pub finished: bool,
    /// Token usage; present only when `finished` is true, and even then
    /// only if the provider reported it.
    pub usage: Option<Usage>,
}

impl CompletionChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            ..Self::default()
        }
    }

    pub fn finished(usage: Option<Usage>) -> Self {
        Self {
            finished: true,
            usage,
            ..Self::default()
        }
    }
}

/// A piece of a streamed tool call.
///
/// Fragments with the same `id` are concatenated in arrival order; a
/// missing or empty id binds the fragment to the most recently started
/// tool call.
#[derive(Debug, Clone, Default)]
pub struct ToolCallFragment {
    pub id: Option<String>,
    /// Fragment of the function name (may be empty).
    pub name: String,
    /// Fragment of the argument text (may be empty).
    pub arguments: String,
}

/// Token usage for a completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
