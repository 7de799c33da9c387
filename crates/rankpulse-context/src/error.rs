use thiserror::Error;

/// Errors a single source collection attempt can produce.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by {source_name} (retry after {retry_after_secs}s)")]
    RateLimited {
        source_name: String,
        retry_after_secs: u64,
    },

    #[error("unexpected HTTP status {status} from {source_name}")]
    UnexpectedStatus { status: u16, source_name: String },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// The snapshot store could not be queried.
    #[error("store error: {0}")]
    Store(String),

    #[error("invalid source configuration: {0}")]
    Config(String),
}

impl SourceError {
    /// Returns `true` for errors that are worth retrying after a back-off delay.
    ///
    /// Network failures, 429, 5xx and store errors are transient. Other 4xx
    /// statuses, malformed bodies and configuration errors are not.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            SourceError::Http(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            SourceError::RateLimited { .. } | SourceError::Store(_) => true,
            SourceError::UnexpectedStatus { status, .. } => *status >= 500,
            SourceError::Deserialize { .. } | SourceError::Config(_) => false,
        }
    }
}

impl From<rankpulse_db::DbError> for SourceError {
    fn from(err: rankpulse_db::DbError) -> Self {
        SourceError::Store(err.to_string())
    }
}
