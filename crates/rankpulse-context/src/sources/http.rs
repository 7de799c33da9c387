use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use rankpulse_core::ContextItem;
use reqwest::Client;
use serde::Deserialize;

use crate::collector::{SourceCollector, SourceRequest};
use crate::error::SourceError;

const USER_AGENT: &str = concat!("rankpulse/", env!("CARGO_PKG_VERSION"));

/// Body returned by an HTTP context endpoint.
#[derive(Debug, Deserialize)]
struct ItemsResponse {
    #[serde(default)]
    items: Vec<ContextItem>,
}

/// Queries a remote JSON endpoint for items about one event.
///
/// The endpoint receives `entity_id`, `category_id`, `event_type`, `start` and
/// `end` as query parameters and answers with `{"items": [...]}`.
#[derive(Debug, Clone)]
pub struct HttpSourceCollector {
    name: String,
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    max_items: Option<usize>,
}

impl HttpSourceCollector {
    /// # Errors
    ///
    /// Returns [`SourceError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            name: name.into(),
            client,
            endpoint: endpoint.into(),
            api_key: None,
            max_items: None,
        })
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    #[must_use]
    pub fn with_max_items(mut self, max_items: Option<usize>) -> Self {
        self.max_items = max_items;
        self
    }

    fn query(request: &SourceRequest) -> [(&'static str, String); 5] {
        [
            ("entity_id", request.entity_id.clone()),
            ("category_id", request.category_id.clone()),
            ("event_type", request.event_type.as_str().to_string()),
            (
                "start",
                request
                    .window
                    .start
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            (
                "end",
                request.window.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        ]
    }
}

#[async_trait]
impl SourceCollector for HttpSourceCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, request: &SourceRequest) -> Result<Vec<ContextItem>, SourceError> {
        let mut builder = self
            .client
            .get(&self.endpoint)
            .query(&Self::query(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(1);
            return Err(SourceError::RateLimited {
                source_name: self.name.clone(),
                retry_after_secs,
            });
        }

        if !status.is_success() {
            return Err(SourceError::UnexpectedStatus {
                status: status.as_u16(),
                source_name: self.name.clone(),
            });
        }

        let body = response.text().await?;
        let parsed: ItemsResponse =
            serde_json::from_str(&body).map_err(|source| SourceError::Deserialize {
                context: format!("{} items response", self.name),
                source,
            })?;

        let mut items = parsed.items;
        if let Some(max) = self.max_items {
            items.truncate(max);
        }

        tracing::debug!(
            source = %self.name,
            event_id = %request.event_id,
            count = items.len(),
            "collected http context items"
        );
        Ok(items)
    }
}
