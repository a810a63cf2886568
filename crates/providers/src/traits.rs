use colony_domain::chat::{ChatMessage, Completion, CompletionOptions, Embedding};
use colony_domain::error::Result;
use colony_domain::stream::{BoxStream, CompletionChunk};

/// Trait that every provider adapter must implement.
///
/// Implementations translate between our internal chat types and the
/// wire format of one vendor's HTTP API. Streams returned by
/// `complete_stream` are lazy, finite and non-restartable: tool-call
/// assembly state lives only for the duration of one stream, and an
/// abandoned stream is simply dropped.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Start a streaming completion and return the chunk sequence.
    async fn complete_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<CompletionChunk>>>;

    /// Run a completion to the end and return the full result.
    /// Semantically equivalent to draining the stream and reassembling.
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion>;

    /// Generate an embedding for one text.
    async fn embed(&self, model: &str, text: &str) -> Result<Embedding>;

    /// The operator-chosen provider name this adapter was built for.
    fn provider_name(&self) -> &str;
}
