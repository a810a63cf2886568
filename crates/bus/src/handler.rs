//! The handler contract and adapters for registering plain functions.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use colony_domain::ability::AbilityError;

/// Identity of one invocation, passed to every handler.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Unique id of this call (also used for call-record correlation).
    pub call_id: String,
    /// Task on whose behalf the call is made, or
    /// [`colony_domain::ability::SYSTEM_CALLER`] for internal calls.
    pub caller_id: String,
}

/// What a handler returns: a success payload or a typed failure.
pub type HandlerResult = std::result::Result<Value, AbilityError>;

/// An ability implementation.
///
/// The bus parses and schema-validates the raw input before calling
/// `handle`, so `input` is always a JSON value that satisfies the
/// descriptor's input schema. Handlers may re-enter the bus (`invoke`
/// from inside `handle`); no lock is held across the call.
#[async_trait::async_trait]
pub trait AbilityHandler: Send + Sync {
    async fn handle(&self, call: CallContext, input: Value) -> HandlerResult;
}

struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F, Fut> AbilityHandler for FnHandler<F>
where
    F: Fn(CallContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, call: CallContext, input: Value) -> HandlerResult {
        (self.0)(call, input).await
    }
}

/// Wrap an async closure as an [`AbilityHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn AbilityHandler>
where
    F: Fn(CallContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct TypedHandler<F, I, O>(F, std::marker::PhantomData<fn(I) -> O>);

#[async_trait::async_trait]
impl<F, Fut, I, O> AbilityHandler for TypedHandler<F, I, O>
where
    F: Fn(CallContext, I) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<O, AbilityError>> + Send,
    I: DeserializeOwned + Send,
    O: Serialize,
{
    async fn handle(&self, call: CallContext, input: Value) -> HandlerResult {
        // The schema already accepted the value; a deserialize failure here
        // means descriptor and input type disagree, which is a bug.
        let typed: I = serde_json::from_value(input)
            .map_err(|e| AbilityError::failure(format!("input does not match handler type: {e}")))?;
        let out = (self.0)(call, typed).await?;
        serde_json::to_value(out).map_err(AbilityError::from)
    }
}

/// Wrap an async closure over serde types as an [`AbilityHandler`].
///
/// The bus validates against the descriptor schema first, then this
/// adapter deserializes into `I` and serializes the `O` result back to a
/// JSON value for the text wire.
pub fn typed_handler_fn<F, Fut, I, O>(f: F) -> Arc<dyn AbilityHandler>
where
    F: Fn(CallContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<O, AbilityError>> + Send + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + 'static,
{
    Arc::new(TypedHandler(f, std::marker::PhantomData))
}
