use std::env::VarError;
use std::fmt::Display;
use std::str::FromStr;

use crate::app_config::{AppConfig, Environment};
use crate::detector::DetectorThresholds;
use crate::event::Severity;
use crate::window::WindowConfig;
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Parses `var` (or `default` when unset) into `T`.
fn parse_var<F, T>(lookup: &F, var: &str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(var).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so tests can pass a `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("RANKPULSE_ENV", "development"))?;

    let bind_addr: SocketAddr = parse_var(&lookup, "RANKPULSE_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("RANKPULSE_LOG_LEVEL", "info");
    let sources_path = PathBuf::from(or_default(
        "RANKPULSE_SOURCES_PATH",
        "./config/sources.yaml",
    ));

    let api_keys: Vec<String> = lookup("RANKPULSE_API_KEYS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(ToString::to_string)
        .collect();
    let anthropic_api_key = lookup("ANTHROPIC_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());

    let db_max_connections: u32 = parse_var(&lookup, "RANKPULSE_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections: u32 = parse_var(&lookup, "RANKPULSE_DB_MIN_CONNECTIONS", "1")?;
    if db_min_connections > db_max_connections {
        return Err(invalid(
            "RANKPULSE_DB_MIN_CONNECTIONS",
            format!("must not exceed RANKPULSE_DB_MAX_CONNECTIONS ({db_max_connections})"),
        ));
    }
    let db_acquire_timeout_secs = parse_var(&lookup, "RANKPULSE_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let lookback_days: i64 = parse_var(&lookup, "RANKPULSE_EVENT_LOOKBACK_DAYS", "7")?;
    let lookforward_days: i64 = parse_var(&lookup, "RANKPULSE_EVENT_LOOKFORWARD_DAYS", "3")?;
    let window = WindowConfig::from_days(lookback_days, lookforward_days)?;

    let thresholds = DetectorThresholds {
        rank_change_abs: parse_var(&lookup, "RANKPULSE_RANK_CHANGE_ABS", "10")?,
        rank_change_pct: parse_var(&lookup, "RANKPULSE_RANK_CHANGE_PCT", "30")?,
        price_change_pct: parse_var(&lookup, "RANKPULSE_PRICE_CHANGE_PCT", "20")?,
        review_surge_abs: parse_var(&lookup, "RANKPULSE_REVIEW_SURGE_ABS", "100")?,
    };

    let source_timeout_secs: u64 = parse_var(&lookup, "RANKPULSE_SOURCE_TIMEOUT_SECS", "30")?;
    if source_timeout_secs == 0 {
        return Err(invalid("RANKPULSE_SOURCE_TIMEOUT_SECS", "must be positive".to_string()));
    }
    let source_max_retries = parse_var(&lookup, "RANKPULSE_SOURCE_MAX_RETRIES", "3")?;
    let source_backoff_base_ms = parse_var(&lookup, "RANKPULSE_SOURCE_BACKOFF_BASE_MS", "500")?;
    let collection_deadline_secs: u64 =
        parse_var(&lookup, "RANKPULSE_COLLECTION_DEADLINE_SECS", "300")?;
    if collection_deadline_secs == 0 {
        return Err(invalid(
            "RANKPULSE_COLLECTION_DEADLINE_SECS",
            "must be positive".to_string(),
        ));
    }
    let source_call_budget = parse_var(&lookup, "RANKPULSE_SOURCE_CALL_BUDGET", "500")?;

    let max_concurrent_events: usize =
        parse_var(&lookup, "RANKPULSE_MAX_CONCURRENT_EVENTS", "4")?;
    if max_concurrent_events == 0 {
        return Err(invalid(
            "RANKPULSE_MAX_CONCURRENT_EVENTS",
            "must be at least 1".to_string(),
        ));
    }
    let min_pipeline_severity: Severity =
        parse_var(&lookup, "RANKPULSE_MIN_PIPELINE_SEVERITY", "high")?;
    let min_completeness: f64 = parse_var(&lookup, "RANKPULSE_MIN_COMPLETENESS", "0.0")?;
    if !(0.0..=1.0).contains(&min_completeness) {
        return Err(invalid(
            "RANKPULSE_MIN_COMPLETENESS",
            format!("{min_completeness} is outside [0, 1]"),
        ));
    }
    let stale_after_secs = parse_var(&lookup, "RANKPULSE_STALE_AFTER_SECS", "3600")?;

    let insight_max_reprompts = parse_var(&lookup, "RANKPULSE_INSIGHT_MAX_REPROMPTS", "2")?;
    let insight_timeout_secs = parse_var(&lookup, "RANKPULSE_INSIGHT_TIMEOUT_SECS", "120")?;
    let insight_top_items = parse_var(&lookup, "RANKPULSE_INSIGHT_TOP_ITEMS", "5")?;
    let insight_similar_events = parse_var(&lookup, "RANKPULSE_INSIGHT_SIMILAR_EVENTS", "3")?;
    let llm_model = or_default("RANKPULSE_LLM_MODEL", "claude-3-5-sonnet-20241022");
    let llm_base_url = or_default("RANKPULSE_LLM_BASE_URL", "https://api.anthropic.com");
    let llm_temperature: f64 = parse_var(&lookup, "RANKPULSE_LLM_TEMPERATURE", "0.3")?;
    if !(0.0..=1.0).contains(&llm_temperature) {
        return Err(invalid(
            "RANKPULSE_LLM_TEMPERATURE",
            format!("{llm_temperature} is outside [0, 1]"),
        ));
    }
    let llm_max_tokens = parse_var(&lookup, "RANKPULSE_LLM_MAX_TOKENS", "4096")?;

    let pipeline_cron = or_default("RANKPULSE_PIPELINE_CRON", "0 0 * * * *");

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        sources_path,
        api_keys,
        anthropic_api_key,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        window,
        thresholds,
        source_timeout_secs,
        source_max_retries,
        source_backoff_base_ms,
        collection_deadline_secs,
        source_call_budget,
        max_concurrent_events,
        min_pipeline_severity,
        min_completeness,
        stale_after_secs,
        insight_max_reprompts,
        insight_timeout_secs,
        insight_top_items,
        insight_similar_events,
        llm_model,
        llm_base_url,
        llm_temperature,
        llm_max_tokens,
        pipeline_cron,
    })
}

fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "RANKPULSE_ENV".to_string(),
            reason: format!("expected development, test, or production; got '{other}'"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
