//! Database operations for `context_bundles` and `context_source_results`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rankpulse_core::{ContextBundle, ContextItem, SourceFailure, SourceResult};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BundleRow {
    pub event_id: Uuid,
    pub completeness: f64,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SourceResultRow {
    pub source_name: String,
    pub status: String,
    pub reason_code: Option<String>,
    pub items: Value,
    pub error: Option<String>,
    pub attempts: i32,
}

impl TryFrom<SourceResultRow> for SourceResult {
    type Error = DbError;

    fn try_from(row: SourceResultRow) -> Result<Self, Self::Error> {
        let attempts = u32::try_from(row.attempts).unwrap_or(0);
        let error = row.error.unwrap_or_default();
        match row.status.as_str() {
            "ok" => Ok(SourceResult::Ok {
                items: serde_json::from_value::<Vec<ContextItem>>(row.items)?,
                attempts,
            }),
            "failed" => {
                let reason = match row.reason_code.as_deref() {
                    Some(code) => code.parse::<SourceFailure>()?,
                    None => SourceFailure::SourceError,
                };
                Ok(SourceResult::Failed {
                    reason,
                    error,
                    attempts,
                })
            }
            "timed_out" => Ok(SourceResult::TimedOut { error, attempts }),
            other => Err(DbError::Decode(format!(
                "unknown source status '{other}' for source '{}'",
                row.source_name
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

async fn load_per_source<'e, E>(
    executor: E,
    event_id: Uuid,
) -> Result<BTreeMap<String, SourceResult>, DbError>
where
    E: sqlx::PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, SourceResultRow>(
        "SELECT source_name, status, reason_code, items, error, attempts \
         FROM context_source_results \
         WHERE event_id = $1 \
         ORDER BY source_name",
    )
    .bind(event_id)
    .fetch_all(executor)
    .await?;

    let mut per_source = BTreeMap::new();
    for row in rows {
        let name = row.source_name.clone();
        per_source.insert(name, SourceResult::try_from(row)?);
    }
    Ok(per_source)
}

/// Load the bundle for an event, if one has been saved.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if a query fails, or [`DbError::Decode`] if a
/// stored result is malformed.
pub async fn get_bundle(pool: &PgPool, event_id: Uuid) -> Result<Option<ContextBundle>, DbError> {
    let Some(bundle) = sqlx::query_as::<_, BundleRow>(
        "SELECT event_id, completeness, collected_at FROM context_bundles WHERE event_id = $1",
    )
    .bind(event_id)
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    Ok(Some(ContextBundle {
        event_id: bundle.event_id,
        per_source: load_per_source(pool, event_id).await?,
        completeness: bundle.completeness,
        collected_at: bundle.collected_at,
    }))
}

/// Merge a bundle into storage and return the stored result.
///
/// A source result already stored as `ok` is never overwritten, so a resumed
/// or late collection cannot lose evidence gathered by an earlier attempt.
/// Completeness is recomputed from the merged rows against `configured`
/// inside the same transaction; the caller's value is ignored. The bundle
/// row is locked for the duration, so concurrent merges serialize.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails, or [`DbError::Decode`]
/// if items cannot be serialized or stored rows are malformed.
pub async fn save_bundle(
    pool: &PgPool,
    bundle: &ContextBundle,
    configured: &[String],
) -> Result<ContextBundle, DbError> {
    let mut tx = pool.begin().await?;

    // Upsert takes the row lock that serializes concurrent merges.
    sqlx::query(
        "INSERT INTO context_bundles (event_id, completeness, collected_at) \
         VALUES ($1, 0, $2) \
         ON CONFLICT (event_id) DO UPDATE \
         SET collected_at = GREATEST(context_bundles.collected_at, EXCLUDED.collected_at)",
    )
    .bind(bundle.event_id)
    .bind(bundle.collected_at)
    .execute(&mut *tx)
    .await?;

    for (source_name, result) in &bundle.per_source {
        let reason_code = match result {
            SourceResult::Failed { reason, .. } => Some(reason.as_str()),
            _ => None,
        };
        let attempts = i32::try_from(result.attempts()).unwrap_or(i32::MAX);

        sqlx::query(
            "INSERT INTO context_source_results \
                 (event_id, source_name, status, reason_code, items, error, attempts, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) \
             ON CONFLICT (event_id, source_name) DO UPDATE \
             SET status = EXCLUDED.status, reason_code = EXCLUDED.reason_code, \
                 items = EXCLUDED.items, error = EXCLUDED.error, \
                 attempts = EXCLUDED.attempts, updated_at = NOW() \
             WHERE context_source_results.status <> 'ok'",
        )
        .bind(bundle.event_id)
        .bind(source_name)
        .bind(result.status())
        .bind(reason_code)
        .bind(serde_json::to_value(result.items())?)
        .bind(result.error())
        .bind(attempts)
        .execute(&mut *tx)
        .await?;
    }

    let per_source = load_per_source(&mut *tx, bundle.event_id).await?;
    let completeness = rankpulse_core::bundle::completeness(&per_source, configured);

    let stored = sqlx::query_as::<_, BundleRow>(
        "UPDATE context_bundles SET completeness = $2 WHERE event_id = $1 \
         RETURNING event_id, completeness, collected_at",
    )
    .bind(bundle.event_id)
    .bind(completeness)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(ContextBundle {
        event_id: stored.event_id,
        per_source,
        completeness: stored.completeness,
        collected_at: stored.collected_at,
    })
}
