//! Database operations for the append-only `snapshots` table.

use chrono::{DateTime, Utc};
use rankpulse_core::{SeriesKey, Snapshot, StockStatus};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `snapshots` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    pub id: i64,
    pub entity_id: String,
    pub category_id: String,
    pub rank: i32,
    pub price: Option<Decimal>,
    pub rating: Option<Decimal>,
    pub review_count: Option<i32>,
    pub stock_status: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl TryFrom<SnapshotRow> for Snapshot {
    type Error = DbError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        let stock_status = row
            .stock_status
            .as_deref()
            .map(str::parse::<StockStatus>)
            .transpose()?;
        Ok(Snapshot {
            entity_id: row.entity_id,
            category_id: row.category_id,
            rank: row.rank,
            price: row.price,
            rating: row.rating,
            review_count: row.review_count,
            stock_status,
            observed_at: row.observed_at,
        })
    }
}

/// First and last observation of another entity in the same category within
/// a time window.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CategoryMoverRow {
    pub entity_id: String,
    pub start_rank: i32,
    pub end_rank: i32,
    pub start_price: Option<Decimal>,
    pub end_price: Option<Decimal>,
    pub end_rating: Option<Decimal>,
    pub last_observed_at: DateTime<Utc>,
}

const SNAPSHOT_COLUMNS: &str = "id, entity_id, category_id, rank, price, rating, \
                                review_count, stock_status, observed_at";

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Append a snapshot. A second snapshot with the same
/// `(entity_id, category_id, observed_at)` is ignored.
///
/// Returns `true` when a new row was written.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_snapshot(pool: &PgPool, snapshot: &Snapshot) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO snapshots \
             (entity_id, category_id, rank, price, rating, review_count, stock_status, observed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (entity_id, category_id, observed_at) DO NOTHING",
    )
    .bind(&snapshot.entity_id)
    .bind(&snapshot.category_id)
    .bind(snapshot.rank)
    .bind(snapshot.price)
    .bind(snapshot.rating)
    .bind(snapshot.review_count)
    .bind(snapshot.stock_status.map(StockStatus::as_str))
    .bind(snapshot.observed_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// The two most recent snapshots of a series as `(prev, curr)`.
///
/// Returns `None` when the series has no snapshots; `prev` is `None` when it
/// has exactly one.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails, or [`DbError::Decode`] if a
/// stored value is malformed.
pub async fn latest_snapshot_pair(
    pool: &PgPool,
    key: &SeriesKey,
) -> Result<Option<(Option<Snapshot>, Snapshot)>, DbError> {
    let rows = sqlx::query_as::<_, SnapshotRow>(&format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM snapshots \
         WHERE entity_id = $1 AND category_id = $2 \
         ORDER BY observed_at DESC \
         LIMIT 2"
    ))
    .bind(&key.entity_id)
    .bind(&key.category_id)
    .fetch_all(pool)
    .await?;

    let mut rows = rows.into_iter();
    let Some(curr) = rows.next() else {
        return Ok(None);
    };
    let prev = rows.next().map(Snapshot::try_from).transpose()?;
    Ok(Some((prev, Snapshot::try_from(curr)?)))
}

/// Every series that received a snapshot at or after `since` (or ever, when `None`).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_tracked_series(
    pool: &PgPool,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<SeriesKey>, DbError> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT DISTINCT entity_id, category_id FROM snapshots \
         WHERE ($1::TIMESTAMPTZ IS NULL OR observed_at >= $1) \
         ORDER BY entity_id, category_id",
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(entity_id, category_id)| SeriesKey {
            entity_id,
            category_id,
        })
        .collect())
}

/// Other entities in `category_id` observed inside `[start, end]`, largest rank
/// movement first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_category_movers(
    pool: &PgPool,
    category_id: &str,
    exclude_entity_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<CategoryMoverRow>, DbError> {
    let rows = sqlx::query_as::<_, CategoryMoverRow>(
        "WITH windowed AS ( \
             SELECT entity_id, rank, price, rating, observed_at, \
                    ROW_NUMBER() OVER (PARTITION BY entity_id ORDER BY observed_at ASC) AS first_rn, \
                    ROW_NUMBER() OVER (PARTITION BY entity_id ORDER BY observed_at DESC) AS last_rn \
             FROM snapshots \
             WHERE category_id = $1 AND entity_id <> $2 \
               AND observed_at BETWEEN $3 AND $4 \
         ) \
         SELECT f.entity_id, \
                f.rank AS start_rank, l.rank AS end_rank, \
                f.price AS start_price, l.price AS end_price, \
                l.rating AS end_rating, l.observed_at AS last_observed_at \
         FROM windowed f \
         JOIN windowed l ON l.entity_id = f.entity_id AND l.last_rn = 1 \
         WHERE f.first_rn = 1 \
         ORDER BY ABS(f.rank - l.rank) DESC, f.entity_id \
         LIMIT $5",
    )
    .bind(category_id)
    .bind(exclude_entity_id)
    .bind(start)
    .bind(end)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
