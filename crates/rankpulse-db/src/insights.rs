//! Database operations for the `insights` table.

use chrono::{DateTime, Utc};
use rankpulse_core::{Cause, Insight, Recommendation, SimilarMatch};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `insights` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InsightRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub summary: String,
    pub analysis: Option<String>,
    pub causes: Value,
    pub recommendations: Value,
    pub confidence_score: f64,
    pub model_id: String,
    pub prompt_version: String,
    pub attempts: i32,
    pub similar_events: Value,
    pub is_current: bool,
    pub generated_at: DateTime<Utc>,
}

impl TryFrom<InsightRow> for Insight {
    type Error = DbError;

    fn try_from(row: InsightRow) -> Result<Self, Self::Error> {
        Ok(Insight {
            id: row.id,
            event_id: row.event_id,
            summary: row.summary,
            analysis: row.analysis,
            causes: serde_json::from_value::<Vec<Cause>>(row.causes)?,
            recommendations: serde_json::from_value::<Vec<Recommendation>>(row.recommendations)?,
            confidence_score: row.confidence_score,
            model_id: row.model_id,
            prompt_version: row.prompt_version,
            attempts: u32::try_from(row.attempts).unwrap_or(1),
            similar_events: serde_json::from_value::<Vec<SimilarMatch>>(row.similar_events)?,
            generated_at: row.generated_at,
        })
    }
}

const INSIGHT_COLUMNS: &str = "id, event_id, summary, analysis, causes, recommendations, \
                               confidence_score, model_id, prompt_version, attempts, \
                               similar_events, is_current, generated_at";

/// Store an insight as the current one for its event.
///
/// Any previously current insight is kept but demoted, so regeneration never
/// destroys history.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if a statement fails (including the CHECK on
/// `confidence_score`), or [`DbError::Decode`] if causes cannot be serialized.
pub async fn insert_insight(pool: &PgPool, insight: &Insight) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE insights SET is_current = FALSE WHERE event_id = $1 AND is_current")
        .bind(insight.event_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO insights \
             (id, event_id, summary, analysis, causes, recommendations, confidence_score, \
              model_id, prompt_version, attempts, similar_events, is_current, generated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, TRUE, $12)",
    )
    .bind(insight.id)
    .bind(insight.event_id)
    .bind(&insight.summary)
    .bind(insight.analysis.as_deref())
    .bind(serde_json::to_value(&insight.causes)?)
    .bind(serde_json::to_value(&insight.recommendations)?)
    .bind(insight.confidence_score)
    .bind(&insight.model_id)
    .bind(&insight.prompt_version)
    .bind(i32::try_from(insight.attempts).unwrap_or(i32::MAX))
    .bind(serde_json::to_value(&insight.similar_events)?)
    .bind(insight.generated_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or [`DbError::Decode`] if the
/// stored JSON is malformed.
pub async fn get_current_insight(pool: &PgPool, event_id: Uuid) -> Result<Option<Insight>, DbError> {
    let row = sqlx::query_as::<_, InsightRow>(&format!(
        "SELECT {INSIGHT_COLUMNS} FROM insights WHERE event_id = $1 AND is_current"
    ))
    .bind(event_id)
    .fetch_optional(pool)
    .await?;

    row.map(Insight::try_from).transpose()
}

/// Every insight generated for an event, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or [`DbError::Decode`] if the
/// stored JSON is malformed.
pub async fn list_insights_for_event(
    pool: &PgPool,
    event_id: Uuid,
) -> Result<Vec<Insight>, DbError> {
    let rows = sqlx::query_as::<_, InsightRow>(&format!(
        "SELECT {INSIGHT_COLUMNS} FROM insights WHERE event_id = $1 \
         ORDER BY generated_at DESC, id"
    ))
    .bind(event_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Insight::try_from).collect()
}
