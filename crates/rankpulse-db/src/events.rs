//! Database operations for `ranking_events` and their pipeline state.
//!
//! State writes are optimistic: every transition names the state and version
//! the caller last observed, and fails with [`DbError::StaleTransition`] when
//! another worker got there first.

use chrono::{DateTime, Utc};
use rankpulse_core::{
    EventState, EventType, FailureCode, FailureReason, RankingEvent, Severity, Snapshot,
    TimeWindow,
};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row type
// ---------------------------------------------------------------------------

/// A row from the `ranking_events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    pub id: Uuid,
    pub entity_id: String,
    pub category_id: String,
    pub event_type: String,
    pub severity: String,
    pub magnitude_pct: Option<f64>,
    pub prev_snapshot: Value,
    pub curr_snapshot: Value,
    pub detected_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub state: String,
    pub version: i64,
    pub state_changed_at: DateTime<Utc>,
    pub failure_stage: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
}

impl TryFrom<EventRow> for RankingEvent {
    type Error = DbError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let failure = match (row.failure_stage, row.failure_code) {
            (Some(stage), Some(code)) => Some(FailureReason {
                stage: stage.parse::<EventState>()?,
                code: code.parse::<FailureCode>()?,
                message: row.failure_message.unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(RankingEvent {
            id: row.id,
            entity_id: row.entity_id,
            category_id: row.category_id,
            event_type: row.event_type.parse::<EventType>()?,
            severity: row.severity.parse::<Severity>()?,
            magnitude_pct: row.magnitude_pct,
            prev_snapshot: serde_json::from_value::<Snapshot>(row.prev_snapshot)?,
            curr_snapshot: serde_json::from_value::<Snapshot>(row.curr_snapshot)?,
            detected_at: row.detected_at,
            window: TimeWindow {
                start: row.window_start,
                end: row.window_end,
            },
            state: row.state.parse::<EventState>()?,
            version: row.version,
            state_changed_at: row.state_changed_at,
            failure,
        })
    }
}

const EVENT_COLUMNS: &str = "id, entity_id, category_id, event_type, severity, magnitude_pct, \
                             prev_snapshot, curr_snapshot, detected_at, window_start, window_end, \
                             state, version, state_changed_at, \
                             failure_stage, failure_code, failure_message";

fn decode_all(rows: Vec<EventRow>) -> Result<Vec<RankingEvent>, DbError> {
    rows.into_iter().map(RankingEvent::try_from).collect()
}

/// Filters for the event read interface. Empty fields do not constrain.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub severities: Vec<Severity>,
    pub states: Vec<EventState>,
    pub entity_id: Option<String>,
    pub category_id: Option<String>,
    pub limit: i64,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            severities: Vec::new(),
            states: Vec::new(),
            entity_id: None,
            category_id: None,
            limit: 50,
        }
    }
}

fn text_array<T, F>(values: &[T], to_str: F) -> Option<Vec<String>>
where
    F: Fn(&T) -> &'static str,
{
    if values.is_empty() {
        None
    } else {
        Some(values.iter().map(|v| to_str(v).to_string()).collect())
    }
}

// ---------------------------------------------------------------------------
// Inserts and reads
// ---------------------------------------------------------------------------

/// Persist a newly detected event unless one with the same identity key exists.
///
/// Returns `true` when a new row was written.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails, or [`DbError::Decode`] if a
/// snapshot cannot be serialized.
pub async fn insert_event_if_absent(pool: &PgPool, event: &RankingEvent) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO ranking_events \
             (id, entity_id, category_id, event_type, severity, magnitude_pct, \
              prev_snapshot, curr_snapshot, curr_observed_at, detected_at, \
              window_start, window_end, state, version, state_changed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
         ON CONFLICT DO NOTHING",
    )
    .bind(event.id)
    .bind(&event.entity_id)
    .bind(&event.category_id)
    .bind(event.event_type.as_str())
    .bind(event.severity.as_str())
    .bind(event.magnitude_pct)
    .bind(serde_json::to_value(&event.prev_snapshot)?)
    .bind(serde_json::to_value(&event.curr_snapshot)?)
    .bind(event.curr_snapshot.observed_at)
    .bind(event.detected_at)
    .bind(event.window.start)
    .bind(event.window.end)
    .bind(event.state.as_str())
    .bind(event.version)
    .bind(event.state_changed_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or a decode error if the row
/// holds malformed values.
pub async fn get_event(pool: &PgPool, id: Uuid) -> Result<Option<RankingEvent>, DbError> {
    let row = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {EVENT_COLUMNS} FROM ranking_events WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(RankingEvent::try_from).transpose()
}

/// Events matching `filter`, newest detection first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or a decode error if a row
/// holds malformed values.
pub async fn list_events(pool: &PgPool, filter: &EventFilter) -> Result<Vec<RankingEvent>, DbError> {
    let rows = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {EVENT_COLUMNS} FROM ranking_events \
         WHERE ($1::TIMESTAMPTZ IS NULL OR detected_at >= $1) \
           AND ($2::TIMESTAMPTZ IS NULL OR detected_at <= $2) \
           AND ($3::TEXT[] IS NULL OR severity = ANY($3)) \
           AND ($4::TEXT[] IS NULL OR state = ANY($4)) \
           AND ($5::TEXT IS NULL OR entity_id = $5) \
           AND ($6::TEXT IS NULL OR category_id = $6) \
         ORDER BY detected_at DESC, id \
         LIMIT $7"
    ))
    .bind(filter.from)
    .bind(filter.to)
    .bind(text_array(&filter.severities, |s| s.as_str()))
    .bind(text_array(&filter.states, |s| s.as_str()))
    .bind(filter.entity_id.as_deref())
    .bind(filter.category_id.as_deref())
    .bind(filter.limit)
    .fetch_all(pool)
    .await?;

    decode_all(rows)
}

/// Events in any of `states` with severity at or above `min_severity`,
/// oldest detection first so backlogs drain in order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or a decode error if a row
/// holds malformed values.
pub async fn list_events_in_states(
    pool: &PgPool,
    states: &[EventState],
    min_severity: Severity,
    limit: i64,
) -> Result<Vec<RankingEvent>, DbError> {
    let severities: Vec<&str> = min_severity
        .at_or_above()
        .into_iter()
        .map(Severity::as_str)
        .collect();
    let states: Vec<&str> = states.iter().map(|s| s.as_str()).collect();

    let rows = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {EVENT_COLUMNS} FROM ranking_events \
         WHERE severity = ANY($1) AND state = ANY($2) \
         ORDER BY detected_at ASC, id \
         LIMIT $3"
    ))
    .bind(severities)
    .bind(states)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    decode_all(rows)
}

/// In-flight events whose last state write is older than `older_than`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or a decode error if a row
/// holds malformed values.
pub async fn list_stale_events(
    pool: &PgPool,
    older_than: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<RankingEvent>, DbError> {
    let rows = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {EVENT_COLUMNS} FROM ranking_events \
         WHERE state IN ('CONTEXT_COLLECTING', 'CONTEXT_COLLECTED', 'INSIGHT_GENERATING') \
           AND state_changed_at < $1 \
         ORDER BY state_changed_at ASC, id \
         LIMIT $2"
    ))
    .bind(older_than)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    decode_all(rows)
}

/// An event joined with the summary of its current insight.
#[derive(Debug, Clone, sqlx::FromRow)]
struct CandidateRow {
    #[sqlx(flatten)]
    event: EventRow,
    summary: Option<String>,
}

/// Analysed events that could serve as precedents for `event`: same type or
/// same category, newest first, excluding `event` itself.
///
/// Scoring is left to [`rankpulse_core::rank_similar`]; this only narrows the
/// pool.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or a decode error if a row
/// holds malformed values.
pub async fn list_similar_candidates(
    pool: &PgPool,
    event: &RankingEvent,
    limit: i64,
) -> Result<Vec<(RankingEvent, Option<String>)>, DbError> {
    let rows = sqlx::query_as::<_, CandidateRow>(&format!(
        "SELECT {EVENT_COLUMNS}, \
                (SELECT i.summary FROM insights i \
                  WHERE i.event_id = ranking_events.id AND i.is_current) AS summary \
         FROM ranking_events \
         WHERE state = 'INSIGHT_GENERATED' \
           AND id <> $1 \
           AND (event_type = $2 OR category_id = $3) \
         ORDER BY detected_at DESC, id \
         LIMIT $4"
    ))
    .bind(event.id)
    .bind(event.event_type.as_str())
    .bind(&event.category_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| Ok((RankingEvent::try_from(row.event)?, row.summary)))
        .collect()
}

// ---------------------------------------------------------------------------
// State transitions
// ---------------------------------------------------------------------------

/// Move an event from `expected_state` to `next`, bumping its version.
///
/// # Errors
///
/// Returns [`DbError::Domain`] if the transition is not allowed,
/// [`DbError::StaleTransition`] if the event moved since it was read, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn transition_event_state(
    pool: &PgPool,
    id: Uuid,
    expected_state: EventState,
    expected_version: i64,
    next: EventState,
) -> Result<RankingEvent, DbError> {
    expected_state.check_transition(next)?;

    let row = sqlx::query_as::<_, EventRow>(&format!(
        "UPDATE ranking_events \
         SET state = $1, version = version + 1, state_changed_at = NOW() \
         WHERE id = $2 AND state = $3 AND version = $4 \
         RETURNING {EVENT_COLUMNS}"
    ))
    .bind(next.as_str())
    .bind(id)
    .bind(expected_state.as_str())
    .bind(expected_version)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => RankingEvent::try_from(row),
        None => Err(DbError::StaleTransition {
            id,
            expected_state,
            expected_version,
        }),
    }
}

/// Move an event to `FAILED`, recording why.
///
/// # Errors
///
/// Returns [`DbError::Domain`] if the event is already terminal,
/// [`DbError::StaleTransition`] if it moved since it was read, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn fail_event(
    pool: &PgPool,
    id: Uuid,
    expected_state: EventState,
    expected_version: i64,
    reason: &FailureReason,
) -> Result<RankingEvent, DbError> {
    expected_state.check_transition(EventState::Failed)?;

    let row = sqlx::query_as::<_, EventRow>(&format!(
        "UPDATE ranking_events \
         SET state = 'FAILED', version = version + 1, state_changed_at = NOW(), \
             failure_stage = $1, failure_code = $2, failure_message = $3 \
         WHERE id = $4 AND state = $5 AND version = $6 \
         RETURNING {EVENT_COLUMNS}"
    ))
    .bind(reason.stage.as_str())
    .bind(reason.code.as_str())
    .bind(&reason.message)
    .bind(id)
    .bind(expected_state.as_str())
    .bind(expected_version)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => RankingEvent::try_from(row),
        None => Err(DbError::StaleTransition {
            id,
            expected_state,
            expected_version,
        }),
    }
}

/// Operator action: return a `FAILED` event to `DETECTED` and clear its failure.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the event does not exist,
/// [`DbError::StaleTransition`] if it is not `FAILED`, or [`DbError::Sqlx`]
/// if the update fails.
pub async fn requeue_failed_event(pool: &PgPool, id: Uuid) -> Result<RankingEvent, DbError> {
    let row = sqlx::query_as::<_, EventRow>(&format!(
        "UPDATE ranking_events \
         SET state = 'DETECTED', version = version + 1, state_changed_at = NOW(), \
             failure_stage = NULL, failure_code = NULL, failure_message = NULL \
         WHERE id = $1 AND state = 'FAILED' \
         RETURNING {EVENT_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = row {
        return RankingEvent::try_from(row);
    }

    match get_event(pool, id).await? {
        None => Err(DbError::NotFound),
        Some(current) => Err(DbError::StaleTransition {
            id,
            expected_state: EventState::Failed,
            expected_version: current.version,
        }),
    }
}

/// Take ownership of a stale in-flight event by bumping its version without
/// changing state.
///
/// # Errors
///
/// Returns [`DbError::StaleTransition`] if another worker touched the event
/// since it was read, or [`DbError::Sqlx`] if the update fails.
pub async fn reclaim_event(
    pool: &PgPool,
    id: Uuid,
    expected_state: EventState,
    expected_version: i64,
) -> Result<RankingEvent, DbError> {
    let row = sqlx::query_as::<_, EventRow>(&format!(
        "UPDATE ranking_events \
         SET version = version + 1, state_changed_at = NOW() \
         WHERE id = $1 AND state = $2 AND version = $3 \
         RETURNING {EVENT_COLUMNS}"
    ))
    .bind(id)
    .bind(expected_state.as_str())
    .bind(expected_version)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => RankingEvent::try_from(row),
        None => Err(DbError::StaleTransition {
            id,
            expected_state,
            expected_version,
        }),
    }
}
