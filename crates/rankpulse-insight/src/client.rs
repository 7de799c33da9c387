use std::time::Duration;

use async_trait::async_trait;
use rankpulse_core::AppConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::InsightError;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ERROR_BODY_LIMIT: usize = 500;

/// One model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    /// JSON shape the answer must follow.
    pub schema_hint: String,
}

/// A language model that turns a prompt into raw text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Identifier recorded on every insight produced with this model.
    fn model_id(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, InsightError>;
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    system: String,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Client for the Anthropic Messages API.
pub struct AnthropicClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[redacted]")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl AnthropicClient {
    /// # Errors
    ///
    /// Returns [`InsightError::Http`] if the HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, InsightError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.3,
            max_tokens: 4096,
        })
    }

    /// Builds a client from application config.
    ///
    /// # Errors
    ///
    /// Returns [`InsightError::Config`] when `ANTHROPIC_API_KEY` is not set.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, InsightError> {
        let api_key = config.anthropic_api_key.clone().ok_or_else(|| {
            InsightError::Config("ANTHROPIC_API_KEY is required to generate insights".to_string())
        })?;
        Ok(Self::new(
            api_key,
            config.llm_model.clone(),
            Duration::from_secs(config.insight_timeout_secs),
        )?
        .with_base_url(&config.llm_base_url)
        .with_sampling(config.llm_temperature, config.llm_max_tokens))
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_sampling(mut self, temperature: f64, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl TextGenerator for AnthropicClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, InsightError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: format!(
                "{}\n\nThe JSON object must follow this shape:\n{}",
                request.system, request.schema_hint
            ),
            messages: [Message {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(30);
            return Err(InsightError::RateLimited { retry_after_secs });
        }

        let text = response.text().await?;
        if !status.is_success() {
            return Err(InsightError::Api {
                status: status.as_u16(),
                message: text.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        let parsed: MessagesResponse =
            serde_json::from_str(&text).map_err(|source| InsightError::Deserialize {
                context: "messages response".to_string(),
                source,
            })?;

        let output: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        if output.trim().is_empty() {
            return Err(InsightError::EmptyResponse);
        }
        Ok(output)
    }
}
