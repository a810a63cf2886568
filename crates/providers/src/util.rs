//! Shared utility functions for provider adapters.

use colony_domain::error::Error;

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Resolve the API key for an adapter.
///
/// The configured key wins; when it is empty the adapter's conventional
/// environment variable (e.g. `OPENAI_API_KEY`) is consulted. `None`
/// means the request goes out unauthenticated and the provider's 401
/// surfaces as a classified domain error.
pub(crate) fn resolve_api_key(configured: &str, env_var: Option<&str>) -> Option<String> {
    if !configured.is_empty() {
        return Some(configured.to_string());
    }
    let env_var = env_var?;
    match std::env::var(env_var) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => {
            tracing::warn!(
                env_var,
                "no API key configured and environment variable is unset"
            );
            None
        }
    }
}
