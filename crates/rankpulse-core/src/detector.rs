//! Threshold rules that turn a pair of consecutive snapshots into events.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::event::{event_id_for, EventState, EventType, RankingEvent, Severity};
use crate::snapshot::{Snapshot, StockStatus};
use crate::window::WindowConfig;

pub const DEFAULT_RANK_CHANGE_ABS: i32 = 10;
pub const DEFAULT_RANK_CHANGE_PCT: f64 = 30.0;
pub const DEFAULT_PRICE_CHANGE_PCT: f64 = 20.0;
pub const DEFAULT_REVIEW_SURGE_ABS: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorThresholds {
    /// Minimum absolute rank movement (positions).
    pub rank_change_abs: i32,
    /// Minimum rank movement relative to the previous rank, in percent.
    pub rank_change_pct: f64,
    pub price_change_pct: f64,
    /// Minimum number of new reviews between snapshots.
    pub review_surge_abs: i32,
}

impl Default for DetectorThresholds {
    fn default() -> Self {
        Self {
            rank_change_abs: DEFAULT_RANK_CHANGE_ABS,
            rank_change_pct: DEFAULT_RANK_CHANGE_PCT,
            price_change_pct: DEFAULT_PRICE_CHANGE_PCT,
            review_surge_abs: DEFAULT_REVIEW_SURGE_ABS,
        }
    }
}

/// A rule hit before it is wrapped into a [`RankingEvent`].
struct Finding {
    event_type: EventType,
    severity: Severity,
    magnitude_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EventDetector {
    thresholds: DetectorThresholds,
    window: WindowConfig,
}

impl EventDetector {
    #[must_use]
    pub fn new(thresholds: DetectorThresholds, window: WindowConfig) -> Self {
        Self { thresholds, window }
    }

    #[must_use]
    pub fn thresholds(&self) -> &DetectorThresholds {
        &self.thresholds
    }

    /// Compares `prev` against `curr` and returns every rule that fired.
    ///
    /// Pure: the same inputs always yield events with the same identities.
    /// A missing `prev` yields nothing. A rule whose inputs are absent or
    /// malformed is skipped without affecting the other rules.
    #[must_use]
    pub fn detect(
        &self,
        prev: Option<&Snapshot>,
        curr: &Snapshot,
        detected_at: DateTime<Utc>,
    ) -> Vec<RankingEvent> {
        let Some(prev) = prev else {
            tracing::debug!(
                entity_id = %curr.entity_id,
                category_id = %curr.category_id,
                "no previous snapshot; nothing to compare"
            );
            return Vec::new();
        };

        if prev.entity_id != curr.entity_id || prev.category_id != curr.category_id {
            tracing::warn!(
                prev = %prev.series_key(),
                curr = %curr.series_key(),
                "snapshot pair spans different series; skipping"
            );
            return Vec::new();
        }

        if prev.observed_at >= curr.observed_at {
            tracing::warn!(
                series = %curr.series_key(),
                prev_observed_at = %prev.observed_at,
                curr_observed_at = %curr.observed_at,
                "snapshot pair is not in observation order; skipping"
            );
            return Vec::new();
        }

        let findings = [
            self.rank_rule(prev, curr),
            self.price_rule(prev, curr),
            self.review_rule(prev, curr),
            stock_rule(prev, curr),
        ];

        findings
            .into_iter()
            .flatten()
            .map(|finding| self.build_event(finding, prev, curr, detected_at))
            .collect()
    }

    fn rank_rule(&self, prev: &Snapshot, curr: &Snapshot) -> Option<Finding> {
        if prev.rank <= 0 || curr.rank <= 0 {
            tracing::warn!(
                series = %curr.series_key(),
                prev_rank = prev.rank,
                curr_rank = curr.rank,
                "non-positive rank; skipping rank rule"
            );
            return None;
        }

        let delta = i64::from(prev.rank) - i64::from(curr.rank);
        if delta == 0 {
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let pct = delta.abs() as f64 / f64::from(prev.rank) * 100.0;
        let fires = delta.abs() >= i64::from(self.thresholds.rank_change_abs)
            || pct >= self.thresholds.rank_change_pct;
        if !fires {
            return None;
        }

        Some(Finding {
            event_type: if delta > 0 {
                EventType::RankSurge
            } else {
                EventType::RankDrop
            },
            severity: Severity::from_change_pct(pct),
            magnitude_pct: Some(pct),
        })
    }

    fn price_rule(&self, prev: &Snapshot, curr: &Snapshot) -> Option<Finding> {
        let (Some(prev_price), Some(curr_price)) = (prev.price, curr.price) else {
            tracing::debug!(series = %curr.series_key(), "price absent; skipping price rule");
            return None;
        };
        if prev_price <= Decimal::ZERO {
            tracing::warn!(
                series = %curr.series_key(),
                prev_price = %prev_price,
                "non-positive previous price; skipping price rule"
            );
            return None;
        }

        let pct = ((curr_price - prev_price).abs() / prev_price * Decimal::ONE_HUNDRED).to_f64()?;
        if pct < self.thresholds.price_change_pct {
            return None;
        }

        Some(Finding {
            event_type: EventType::PriceChange,
            severity: Severity::from_change_pct(pct),
            magnitude_pct: Some(pct),
        })
    }

    fn review_rule(&self, prev: &Snapshot, curr: &Snapshot) -> Option<Finding> {
        let (Some(prev_count), Some(curr_count)) = (prev.review_count, curr.review_count) else {
            tracing::debug!(series = %curr.series_key(), "review count absent; skipping review rule");
            return None;
        };
        if prev_count < 0 || curr_count < 0 {
            tracing::warn!(
                series = %curr.series_key(),
                prev_count,
                curr_count,
                "negative review count; skipping review rule"
            );
            return None;
        }

        let delta = i64::from(curr_count) - i64::from(prev_count);
        if delta < i64::from(self.thresholds.review_surge_abs) {
            return None;
        }

        // Without a positive baseline there is no meaningful percentage.
        let (severity, magnitude_pct) = if prev_count > 0 {
            #[allow(clippy::cast_precision_loss)]
            let pct = delta as f64 / f64::from(prev_count) * 100.0;
            (Severity::from_change_pct(pct), Some(pct))
        } else {
            (Severity::Medium, None)
        };

        Some(Finding {
            event_type: EventType::ReviewSurge,
            severity,
            magnitude_pct,
        })
    }

    fn build_event(
        &self,
        finding: Finding,
        prev: &Snapshot,
        curr: &Snapshot,
        detected_at: DateTime<Utc>,
    ) -> RankingEvent {
        RankingEvent {
            id: event_id_for(
                &curr.entity_id,
                &curr.category_id,
                finding.event_type,
                curr.observed_at,
            ),
            entity_id: curr.entity_id.clone(),
            category_id: curr.category_id.clone(),
            event_type: finding.event_type,
            severity: finding.severity,
            magnitude_pct: finding.magnitude_pct,
            prev_snapshot: prev.clone(),
            curr_snapshot: curr.clone(),
            detected_at,
            window: self.window.window_for(detected_at),
            state: EventState::Detected,
            version: 0,
            state_changed_at: detected_at,
            failure: None,
        }
    }
}

fn stock_rule(prev: &Snapshot, curr: &Snapshot) -> Option<Finding> {
    let (Some(from), Some(to)) = (prev.stock_status, curr.stock_status) else {
        tracing::debug!(series = %curr.series_key(), "stock status absent; skipping stock rule");
        return None;
    };
    if from == to {
        return None;
    }

    Some(Finding {
        event_type: EventType::StockChange,
        severity: if to == StockStatus::OutOfStock {
            Severity::Critical
        } else {
            Severity::Medium
        },
        magnitude_pct: None,
    })
}

#[cfg(test)]
#[path = "detector_test.rs"]
mod tests;
