//! LLM provider adapters and the model layer.
//!
//! Adapters translate between the provider-agnostic chat/stream types in
//! `colony-domain` and each vendor's HTTP wire format. The model layer
//! owns the provider table and exposes the uniform `model:*` abilities
//! on the bus; nothing outside this crate speaks a vendor protocol.

pub mod anthropic;
pub mod assemble;
pub mod model;
pub mod openai;
mod sse;
pub mod traits;
mod util;

pub use model::{register_model_layer, ModelLayer};
pub use traits::ProviderAdapter;
