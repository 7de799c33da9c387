//! Read-only event queries and the requeue action.

use rankpulse_core::{EventState, RankingEvent, Severity, SourceResult};
use rankpulse_db::{DbError, EventFilter};
use uuid::Uuid;

fn format_magnitude(event: &RankingEvent) -> String {
    event
        .magnitude_pct
        .map_or_else(|| "-".to_string(), |pct| format!("{pct:+.1}%"))
}

/// List recent events, newest first.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub(crate) async fn run_events_list(
    pool: &sqlx::PgPool,
    min_severity: Option<Severity>,
    state: Option<EventState>,
    entity: Option<String>,
    limit: i64,
) -> anyhow::Result<()> {
    let filter = EventFilter {
        severities: min_severity.map(Severity::at_or_above).unwrap_or_default(),
        states: state.into_iter().collect(),
        entity_id: entity,
        limit: limit.clamp(1, 500),
        ..EventFilter::default()
    };
    let events = rankpulse_db::list_events(pool, &filter).await?;

    if events.is_empty() {
        println!("no events found; record snapshots and run `detect` first");
        return Ok(());
    }

    println!(
        "{:<38}{:<14}{:<10}{:<10}{:<20}{:<32}DETECTED",
        "ID", "TYPE", "SEVERITY", "CHANGE", "STATE", "SERIES"
    );
    for event in &events {
        println!(
            "{:<38}{:<14}{:<10}{:<10}{:<20}{:<32}{}",
            event.id,
            event.event_type.as_str(),
            event.severity.as_str(),
            format_magnitude(event),
            event.state.as_str(),
            format!("{}/{}", event.entity_id, event.category_id),
            event.detected_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn describe_source(name: &str, result: &SourceResult) -> String {
    match result {
        SourceResult::Ok { items, attempts } => {
            format!("  {name:<20} ok         {} items, {attempts} attempts", items.len())
        }
        SourceResult::Failed {
            reason,
            error,
            attempts,
        } => format!(
            "  {name:<20} {:<10} {error} ({attempts} attempts)",
            reason.as_str()
        ),
        SourceResult::TimedOut { error, attempts } => {
            format!("  {name:<20} timed_out  {error} ({attempts} attempts)")
        }
    }
}

/// Print one event with its context bundle and current insight.
///
/// # Errors
///
/// Returns an error if the event does not exist or a query fails.
pub(crate) async fn run_events_show(pool: &sqlx::PgPool, id: Uuid, json: bool) -> anyhow::Result<()> {
    let event = rankpulse_db::get_event(pool, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("event {id} not found"))?;
    let bundle = rankpulse_db::get_bundle(pool, id).await?;
    let insight = rankpulse_db::get_current_insight(pool, id).await?;

    if json {
        let record = serde_json::json!({
            "event": event,
            "bundle": bundle,
            "insight": insight,
        });
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("event     {}", event.id);
    println!("series    {}/{}", event.entity_id, event.category_id);
    println!(
        "type      {} ({}, {})",
        event.event_type,
        event.severity,
        format_magnitude(&event)
    );
    println!(
        "rank      {} -> {}",
        event.prev_snapshot.rank, event.curr_snapshot.rank
    );
    println!(
        "window    {} .. {}",
        event.window.start.format("%Y-%m-%d"),
        event.window.end.format("%Y-%m-%d")
    );
    println!("state     {} (version {})", event.state, event.version);
    if let Some(failure) = &event.failure {
        println!(
            "failure   {} during {}: {}",
            failure.code, failure.stage, failure.message
        );
    }

    match &bundle {
        Some(bundle) => {
            println!("\ncontext   completeness {:.2}", bundle.completeness);
            for (name, result) in &bundle.per_source {
                println!("{}", describe_source(name, result));
            }
        }
        None => println!("\ncontext   not collected"),
    }

    match &insight {
        Some(insight) => {
            println!(
                "\ninsight   {} (confidence {:.2}, model {})",
                insight.summary, insight.confidence_score, insight.model_id
            );
            for cause in &insight.causes {
                println!("  cause   {} [{:.2}]: {}", cause.cause, cause.confidence, cause.evidence);
            }
            for rec in &insight.recommendations {
                println!("  action  [{}] {}", rec.priority.as_str(), rec.action);
            }
            for past in &insight.similar_events {
                println!("  like    {} [{:.2}]", past.event_id, past.similarity);
            }
        }
        None => println!("\ninsight   none"),
    }
    Ok(())
}

/// Move a FAILED event back to DETECTED.
///
/// # Errors
///
/// Returns an error if the event does not exist, is not FAILED, or the update
/// fails.
pub(crate) async fn run_events_requeue(pool: &sqlx::PgPool, id: Uuid) -> anyhow::Result<()> {
    match rankpulse_db::requeue_failed_event(pool, id).await {
        Ok(event) => {
            println!("event {} requeued; state {}", event.id, event.state);
            Ok(())
        }
        Err(DbError::NotFound) => anyhow::bail!("event {id} not found"),
        Err(DbError::StaleTransition { .. }) => {
            anyhow::bail!("event {id} is not FAILED; only failed events can be requeued")
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rankpulse_core::SourceFailure;

    #[test]
    fn describes_each_source_outcome() {
        let ok = SourceResult::Ok {
            items: vec![],
            attempts: 1,
        };
        assert!(describe_source("news", &ok).contains("0 items, 1 attempts"));

        let failed = SourceResult::Failed {
            reason: SourceFailure::BudgetExhausted,
            error: "call budget exhausted".to_string(),
            attempts: 0,
        };
        let line = describe_source("social", &failed);
        assert!(line.contains("budget_exhausted"));
        assert!(line.contains("call budget exhausted"));
    }
}
