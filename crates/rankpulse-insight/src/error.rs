use thiserror::Error;

/// Errors from a single text-generation call.
#[derive(Debug, Error)]
pub enum InsightError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("rate limited by model API (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("model returned no text content")]
    EmptyResponse,

    #[error("model call timed out after {0}s")]
    Timeout(u64),

    #[error("insight configuration error: {0}")]
    Config(String),
}
