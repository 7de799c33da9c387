use std::sync::Arc;
use std::time::Duration;

use rankpulse_context::{build_sources, ContextOrchestrator, RetryPolicy};
use rankpulse_core::{load_sources, AppConfig};
use rankpulse_insight::{GeneratorSettings, InsightGenerator, TextGenerator};
use sqlx::PgPool;

use crate::coordinator::{CoordinatorSettings, PipelineCoordinator};
use crate::error::PipelineError;
use crate::store::PgStore;

/// Wires a Postgres-backed coordinator from the application config and the
/// sources file it points at. Source API keys are read from the environment.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] if the sources file cannot be loaded and
/// [`PipelineError::Source`] if a configured source cannot be built.
pub fn build_coordinator(
    config: &AppConfig,
    pool: PgPool,
    model: Arc<dyn TextGenerator>,
) -> Result<PipelineCoordinator, PipelineError> {
    let sources_file = load_sources(&config.sources_path)?;
    let sources = build_sources(
        &sources_file,
        &pool,
        Duration::from_secs(config.source_timeout_secs),
        |name| std::env::var(name).ok(),
    )?;

    let retry = RetryPolicy {
        max_retries: config.source_max_retries,
        backoff_base_ms: config.source_backoff_base_ms,
    };
    let context = ContextOrchestrator::new(
        sources,
        retry,
        Duration::from_secs(config.collection_deadline_secs),
    );
    let insight = InsightGenerator::new(
        model,
        GeneratorSettings::from_app_config(config),
        context.source_names(),
    );

    tracing::info!(
        sources = ?context.source_names(),
        model = insight.model_id(),
        "pipeline coordinator configured"
    );

    Ok(PipelineCoordinator::new(
        Arc::new(PgStore::new(pool)),
        context,
        insight,
        CoordinatorSettings::from_app_config(config),
    ))
}
