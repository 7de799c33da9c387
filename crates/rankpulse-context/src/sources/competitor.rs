use std::fmt::Write;

use async_trait::async_trait;
use rankpulse_core::ContextItem;
use rankpulse_db::CategoryMoverRow;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::collector::{SourceCollector, SourceRequest};
use crate::error::SourceError;

const DEFAULT_MAX_ITEMS: usize = 10;

/// Reports how other entities in the same category moved during the event
/// window, read straight from the snapshot store.
#[derive(Debug, Clone)]
pub struct CompetitorRankCollector {
    name: String,
    pool: PgPool,
    max_items: usize,
}

impl CompetitorRankCollector {
    #[must_use]
    pub fn new(name: impl Into<String>, pool: PgPool, max_items: Option<usize>) -> Self {
        Self {
            name: name.into(),
            pool,
            max_items: max_items.unwrap_or(DEFAULT_MAX_ITEMS),
        }
    }
}

#[async_trait]
impl SourceCollector for CompetitorRankCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, request: &SourceRequest) -> Result<Vec<ContextItem>, SourceError> {
        let limit = i64::try_from(self.max_items).unwrap_or(i64::MAX);
        let rows = rankpulse_db::list_category_movers(
            &self.pool,
            &request.category_id,
            &request.entity_id,
            request.window.start,
            request.window.end,
            limit,
        )
        .await?;
        Ok(movers_to_items(&request.category_id, &rows))
    }
}

fn price_change_pct(start: Option<Decimal>, end: Option<Decimal>) -> Option<f64> {
    let (start, end) = (start?, end?);
    if start <= Decimal::ZERO {
        return None;
    }
    ((end - start) / start * Decimal::ONE_HUNDRED).to_f64()
}

/// Converts mover rows into context items. Rows whose rank did not change are
/// skipped.
pub(crate) fn movers_to_items(category_id: &str, rows: &[CategoryMoverRow]) -> Vec<ContextItem> {
    rows.iter()
        .filter(|row| row.start_rank != row.end_rank)
        .map(|row| {
            // Positive means the entity climbed.
            let rank_change = row.start_rank - row.end_rank;
            let direction = if rank_change > 0 { "rose" } else { "fell" };
            let price_pct = price_change_pct(row.start_price, row.end_price);

            let mut body = format!(
                "{} {direction} from #{} to #{} in {category_id}",
                row.entity_id, row.start_rank, row.end_rank
            );
            if let Some(pct) = price_pct {
                let _ = write!(body, "; price changed {pct:+.1}%");
            }

            ContextItem {
                id: format!("{}@{}", row.entity_id, row.last_observed_at.timestamp()),
                title: format!("Competitor {} {direction} {} places", row.entity_id, rank_change.abs()),
                body: Some(body),
                url: None,
                score: Some(f64::from(rank_change.abs())),
                occurred_at: Some(row.last_observed_at),
                attributes: serde_json::json!({
                    "entity_id": row.entity_id,
                    "start_rank": row.start_rank,
                    "end_rank": row.end_rank,
                    "rank_change": rank_change,
                    "price_change_pct": price_pct,
                    "rating": row.end_rating.and_then(|r| r.to_f64()),
                }),
            }
        })
        .collect()
}
