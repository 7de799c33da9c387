//! Precedent lookup: past events that resemble the one being analysed.
//!
//! Similarity is a weighted match on event type, category, entity and the
//! size of the move. Candidates below [`MIN_SIMILARITY`] are dropped, so a
//! precedent has to share at least the event type, or the category plus one
//! other trait.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EventType, RankingEvent, Severity};

const TYPE_WEIGHT: f64 = 0.4;
const CATEGORY_WEIGHT: f64 = 0.3;
const ENTITY_WEIGHT: f64 = 0.2;
const MAGNITUDE_WEIGHT: f64 = 0.1;

pub const MIN_SIMILARITY: f64 = 0.4;

/// A past event offered to the model as a precedent, with the summary of its
/// current insight when it has one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub severity: Severity,
    pub entity_id: String,
    pub category_id: String,
    pub magnitude_pct: Option<f64>,
    pub detected_at: DateTime<Utc>,
    pub summary: Option<String>,
    /// In `[0, 1]`; 1 is an identical event on the same entity.
    pub similarity: f64,
}

/// Reference to a precedent, recorded on the insight it informed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarMatch {
    pub event_id: Uuid,
    pub similarity: f64,
}

impl From<&SimilarEvent> for SimilarMatch {
    fn from(similar: &SimilarEvent) -> Self {
        Self {
            event_id: similar.event_id,
            similarity: similar.similarity,
        }
    }
}

/// `1 - |a - b| / max(|a|, |b|)`; two absent magnitudes (stock changes)
/// count as a full match.
fn magnitude_closeness(a: Option<f64>, b: Option<f64>) -> f64 {
    match (a, b) {
        (None, None) => 1.0,
        (Some(a), Some(b)) => {
            let scale = a.abs().max(b.abs());
            if scale == 0.0 {
                1.0
            } else {
                (1.0 - (a - b).abs() / scale).clamp(0.0, 1.0)
            }
        }
        _ => 0.0,
    }
}

#[must_use]
pub fn similarity(event: &RankingEvent, other: &RankingEvent) -> f64 {
    let mut score = 0.0;
    if event.event_type == other.event_type {
        score += TYPE_WEIGHT;
    }
    if event.category_id == other.category_id {
        score += CATEGORY_WEIGHT;
    }
    if event.entity_id == other.entity_id {
        score += ENTITY_WEIGHT;
    }
    score + MAGNITUDE_WEIGHT * magnitude_closeness(event.magnitude_pct, other.magnitude_pct)
}

/// Scores `candidates` against `event` and keeps the best `limit`.
///
/// The event itself is never its own precedent. Order is similarity
/// descending, then most recent detection, then id.
#[must_use]
pub fn rank_similar<I>(event: &RankingEvent, candidates: I, limit: usize) -> Vec<SimilarEvent>
where
    I: IntoIterator<Item = (RankingEvent, Option<String>)>,
{
    let mut ranked: Vec<SimilarEvent> = candidates
        .into_iter()
        .filter(|(candidate, _)| candidate.id != event.id)
        .filter_map(|(candidate, summary)| {
            let score = similarity(event, &candidate);
            (score >= MIN_SIMILARITY).then(|| SimilarEvent {
                event_id: candidate.id,
                event_type: candidate.event_type,
                severity: candidate.severity,
                entity_id: candidate.entity_id,
                category_id: candidate.category_id,
                magnitude_pct: candidate.magnitude_pct,
                detected_at: candidate.detected_at,
                summary,
                similarity: score,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.detected_at.cmp(&a.detected_at))
            .then_with(|| a.event_id.cmp(&b.event_id))
    });
    ranked.truncate(limit);
    ranked
}
