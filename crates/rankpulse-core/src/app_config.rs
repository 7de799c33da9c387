use std::net::SocketAddr;
use std::path::PathBuf;

use crate::detector::DetectorThresholds;
use crate::event::Severity;
use crate::window::WindowConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub sources_path: PathBuf,
    pub api_keys: Vec<String>,
    pub anthropic_api_key: Option<String>,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub window: WindowConfig,
    pub thresholds: DetectorThresholds,
    pub source_timeout_secs: u64,
    pub source_max_retries: u32,
    pub source_backoff_base_ms: u64,
    pub collection_deadline_secs: u64,
    pub source_call_budget: u64,
    pub max_concurrent_events: usize,
    pub min_pipeline_severity: Severity,
    pub min_completeness: f64,
    pub stale_after_secs: u64,
    pub insight_max_reprompts: u32,
    pub insight_timeout_secs: u64,
    pub insight_top_items: usize,
    /// Similar past events shown to the model; 0 disables the lookup.
    pub insight_similar_events: usize,
    pub llm_model: String,
    pub llm_base_url: String,
    pub llm_temperature: f64,
    pub llm_max_tokens: u32,
    pub pipeline_cron: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("sources_path", &self.sources_path)
            .field("database_url", &"[redacted]")
            .field("api_keys", &format!("[{} redacted]", self.api_keys.len()))
            .field(
                "anthropic_api_key",
                &self.anthropic_api_key.as_ref().map(|_| "[redacted]"),
            )
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("window", &self.window)
            .field("thresholds", &self.thresholds)
            .field("source_timeout_secs", &self.source_timeout_secs)
            .field("source_max_retries", &self.source_max_retries)
            .field("source_backoff_base_ms", &self.source_backoff_base_ms)
            .field("collection_deadline_secs", &self.collection_deadline_secs)
            .field("source_call_budget", &self.source_call_budget)
            .field("max_concurrent_events", &self.max_concurrent_events)
            .field("min_pipeline_severity", &self.min_pipeline_severity)
            .field("min_completeness", &self.min_completeness)
            .field("stale_after_secs", &self.stale_after_secs)
            .field("insight_max_reprompts", &self.insight_max_reprompts)
            .field("insight_timeout_secs", &self.insight_timeout_secs)
            .field("insight_top_items", &self.insight_top_items)
            .field("insight_similar_events", &self.insight_similar_events)
            .field("llm_model", &self.llm_model)
            .field("llm_base_url", &self.llm_base_url)
            .field("llm_temperature", &self.llm_temperature)
            .field("llm_max_tokens", &self.llm_max_tokens)
            .field("pipeline_cron", &self.pipeline_cron)
            .finish()
    }
}
