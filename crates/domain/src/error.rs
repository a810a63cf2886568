/// Shared error type used across all Colony crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// Provider-side failure without an HTTP status (connection refused,
    /// malformed response body, unsupported operation).
    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Provider HTTP error with the upstream status preserved so the
    /// model layer can classify it (401/429/400/...).
    #[error("provider {provider}: HTTP {status}: {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("schema: {0}")]
    Schema(String),

    #[error("config: {0}")]
    Config(String),

    #[error("task: {0}")]
    Task(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
