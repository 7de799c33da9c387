//! Detection and pipeline commands.

use std::sync::Arc;

use rankpulse_core::{AppConfig, EventDetector, SeriesKey};
use rankpulse_insight::AnthropicClient;
use rankpulse_pipeline::{build_coordinator, PgStore, PipelineCoordinator, RunSummary};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub(crate) fn select_series(
    series: Vec<SeriesKey>,
    entity: Option<&str>,
    category: Option<&str>,
) -> Vec<SeriesKey> {
    series
        .into_iter()
        .filter(|key| entity.is_none_or(|e| key.entity_id == e))
        .filter(|key| category.is_none_or(|c| key.category_id == c))
        .collect()
}

/// Runs the detector over every tracked series (or the selected ones) and
/// prints the events it stored.
///
/// # Errors
///
/// Returns an error if the tracked series cannot be listed. Failures on a
/// single series are reported and skipped.
pub(crate) async fn run_detect(
    pool: &sqlx::PgPool,
    config: &AppConfig,
    entity: Option<&str>,
    category: Option<&str>,
) -> anyhow::Result<()> {
    let series = select_series(
        rankpulse_db::list_tracked_series(pool, None).await?,
        entity,
        category,
    );
    if series.is_empty() {
        println!("no tracked series match; record snapshots with `snapshot put` first");
        return Ok(());
    }

    let store = PgStore::new(pool.clone());
    let detector = EventDetector::new(config.thresholds, config.window);
    let mut detected = 0usize;
    let mut failed = 0usize;

    for key in &series {
        match rankpulse_pipeline::detect_series(&store, &detector, key).await {
            Ok(events) => {
                for event in &events {
                    println!(
                        "{}  {:<14}{:<10}{}",
                        event.id,
                        event.event_type.as_str(),
                        event.severity.as_str(),
                        key
                    );
                }
                detected += events.len();
            }
            Err(e) => {
                tracing::warn!(series = %key, error = %e, "detection failed");
                eprintln!("detection failed for {key}: {e}");
                failed += 1;
            }
        }
    }

    println!(
        "detect: {} series checked, {detected} new events, {failed} failures",
        series.len()
    );
    Ok(())
}

fn coordinator(pool: &sqlx::PgPool, config: &AppConfig) -> anyhow::Result<PipelineCoordinator> {
    let client = AnthropicClient::from_app_config(config)?;
    Ok(build_coordinator(config, pool.clone(), Arc::new(client))?)
}

pub(crate) fn format_summary(summary: &RunSummary) -> String {
    format!(
        "run: {} detected, {} dispatched ({} reclaimed), {} generated, {} failed, \
         {} skipped, {} cancelled, {} errors; source calls {} ({} ok)",
        summary.detected,
        summary.dispatched,
        summary.reclaimed,
        summary.generated,
        summary.failed,
        summary.skipped,
        summary.cancelled,
        summary.errors,
        summary.budget_attempted,
        summary.budget_succeeded,
    )
}

/// One full pipeline pass. Ctrl-c stops it at the next state boundary; events
/// keep their persisted state and resume on the next run.
///
/// # Errors
///
/// Returns an error if the model client or sources are misconfigured, or the
/// work queue cannot be read.
pub(crate) async fn run_pipeline(pool: &sqlx::PgPool, config: &AppConfig) -> anyhow::Result<()> {
    let coordinator = coordinator(pool, config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupt received; stopping at the next stage boundary");
            on_interrupt.cancel();
        }
    });

    let summary = coordinator.run_once(&cancel).await?;
    println!("{}", format_summary(&summary));
    Ok(())
}

/// Generate a fresh insight for an event that already has one.
///
/// # Errors
///
/// Returns an error if the event is missing, not `INSIGHT_GENERATED`, or the
/// model fails to produce a valid insight.
pub(crate) async fn run_regenerate(
    pool: &sqlx::PgPool,
    config: &AppConfig,
    id: Uuid,
) -> anyhow::Result<()> {
    let coordinator = coordinator(pool, config)?;
    let insight = coordinator.regenerate_insight(id).await?;
    println!(
        "insight {} stored for event {id} (confidence {:.2}, {} attempts)",
        insight.id, insight.confidence_score, insight.attempts
    );
    println!("{}", insight.summary);
    Ok(())
}
