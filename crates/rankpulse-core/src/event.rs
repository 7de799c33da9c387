//! Ranking events and the pipeline state they carry.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::snapshot::Snapshot;
use crate::CoreError;

// ---------------------------------------------------------------------------
// Event type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    RankSurge,
    RankDrop,
    PriceChange,
    ReviewSurge,
    StockChange,
}

impl EventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::RankSurge => "RANK_SURGE",
            EventType::RankDrop => "RANK_DROP",
            EventType::PriceChange => "PRICE_CHANGE",
            EventType::ReviewSurge => "REVIEW_SURGE",
            EventType::StockChange => "STOCK_CHANGE",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RANK_SURGE" => Ok(EventType::RankSurge),
            "RANK_DROP" => Ok(EventType::RankDrop),
            "PRICE_CHANGE" => Ok(EventType::PriceChange),
            "REVIEW_SURGE" => Ok(EventType::ReviewSurge),
            "STOCK_CHANGE" => Ok(EventType::StockChange),
            other => Err(CoreError::UnknownEventType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Ordered severity levels; `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Maps an absolute change percentage onto a severity level.
    #[must_use]
    pub fn from_change_pct(pct: f64) -> Self {
        let pct = pct.abs();
        if pct >= 70.0 {
            Severity::Critical
        } else if pct >= 50.0 {
            Severity::High
        } else if pct >= 30.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Every level at or above `self`, lowest first.
    #[must_use]
    pub fn at_or_above(self) -> Vec<Severity> {
        [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ]
        .into_iter()
        .filter(|s| *s >= self)
        .collect()
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(CoreError::UnknownSeverity(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventState {
    Detected,
    ContextCollecting,
    ContextCollected,
    InsightGenerating,
    InsightGenerated,
    Failed,
}

impl EventState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventState::Detected => "DETECTED",
            EventState::ContextCollecting => "CONTEXT_COLLECTING",
            EventState::ContextCollected => "CONTEXT_COLLECTED",
            EventState::InsightGenerating => "INSIGHT_GENERATING",
            EventState::InsightGenerated => "INSIGHT_GENERATED",
            EventState::Failed => "FAILED",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, EventState::InsightGenerated | EventState::Failed)
    }

    /// States in which a worker holds the event mid-stage.
    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            EventState::ContextCollecting
                | EventState::ContextCollected
                | EventState::InsightGenerating
        )
    }

    /// The pipeline moves forward one stage at a time, or to `Failed` from any
    /// non-terminal state. Operator requeue is handled separately.
    #[must_use]
    pub fn can_transition_to(self, next: EventState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == EventState::Failed {
            return true;
        }
        matches!(
            (self, next),
            (EventState::Detected, EventState::ContextCollecting)
                | (EventState::ContextCollecting, EventState::ContextCollected)
                | (EventState::ContextCollected, EventState::InsightGenerating)
                | (EventState::InsightGenerating, EventState::InsightGenerated)
        )
    }

    /// Validates a forward transition.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalTransition`] when `next` is not reachable
    /// from `self`.
    pub fn check_transition(self, next: EventState) -> Result<(), CoreError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl std::fmt::Display for EventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DETECTED" => Ok(EventState::Detected),
            "CONTEXT_COLLECTING" => Ok(EventState::ContextCollecting),
            "CONTEXT_COLLECTED" => Ok(EventState::ContextCollected),
            "INSIGHT_GENERATING" => Ok(EventState::InsightGenerating),
            "INSIGHT_GENERATED" => Ok(EventState::InsightGenerated),
            "FAILED" => Ok(EventState::Failed),
            other => Err(CoreError::UnknownEventState(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure reason
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// Bundle completeness fell below the configured minimum.
    InsufficientContext,
    /// Insight generation was reached with no stored context bundle.
    MissingContext,
    /// Every model response failed schema validation.
    InsightValidationExhausted,
    /// The model could not be reached within the attempt allowance.
    InsightModelError,
}

impl FailureCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCode::InsufficientContext => "insufficient_context",
            FailureCode::MissingContext => "missing_context",
            FailureCode::InsightValidationExhausted => "insight_validation_exhausted",
            FailureCode::InsightModelError => "insight_model_error",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureCode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insufficient_context" => Ok(FailureCode::InsufficientContext),
            "missing_context" => Ok(FailureCode::MissingContext),
            "insight_validation_exhausted" => Ok(FailureCode::InsightValidationExhausted),
            "insight_model_error" => Ok(FailureCode::InsightModelError),
            other => Err(CoreError::UnknownFailureCode(other.to_string())),
        }
    }
}

/// Why an event ended in [`EventState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    /// State the event was in when it failed.
    pub stage: EventState,
    pub code: FailureCode,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Ranking event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEvent {
    pub id: Uuid,
    pub entity_id: String,
    pub category_id: String,
    pub event_type: EventType,
    pub severity: Severity,
    /// Change percentage the severity was derived from; absent for stock changes.
    pub magnitude_pct: Option<f64>,
    pub prev_snapshot: Snapshot,
    pub curr_snapshot: Snapshot,
    pub detected_at: DateTime<Utc>,
    pub window: TimeWindow,
    pub state: EventState,
    /// Bumped on every persisted state write; guards concurrent transitions.
    pub version: i64,
    pub state_changed_at: DateTime<Utc>,
    pub failure: Option<FailureReason>,
}

impl RankingEvent {
    /// Text form of the identity key `(entity, category, type, curr.observed_at)`.
    #[must_use]
    pub fn identity_key(&self) -> String {
        identity_key(
            &self.entity_id,
            &self.category_id,
            self.event_type,
            self.curr_snapshot.observed_at,
        )
    }
}

fn identity_key(
    entity_id: &str,
    category_id: &str,
    event_type: EventType,
    observed_at: DateTime<Utc>,
) -> String {
    format!(
        "{entity_id}\u{1f}{category_id}\u{1f}{}\u{1f}{}",
        event_type.as_str(),
        observed_at.timestamp_micros()
    )
}

/// Deterministic event id for an identity key; re-detection yields the same id.
#[must_use]
pub fn event_id_for(
    entity_id: &str,
    category_id: &str,
    event_type: EventType,
    observed_at: DateTime<Utc>,
) -> Uuid {
    let key = identity_key(entity_id, category_id, event_type, observed_at);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn severity_thresholds() {
        assert_eq!(Severity::from_change_pct(80.0), Severity::Critical);
        assert_eq!(Severity::from_change_pct(70.0), Severity::Critical);
        assert_eq!(Severity::from_change_pct(55.0), Severity::High);
        assert_eq!(Severity::from_change_pct(30.0), Severity::Medium);
        assert_eq!(Severity::from_change_pct(29.9), Severity::Low);
        assert_eq!(Severity::from_change_pct(-75.0), Severity::Critical);
    }

    #[test]
    fn severity_orders_low_to_critical() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(
            Severity::High.at_or_above(),
            vec![Severity::High, Severity::Critical]
        );
    }

    #[test]
    fn states_only_move_forward_or_fail() {
        assert!(EventState::Detected.can_transition_to(EventState::ContextCollecting));
        assert!(EventState::ContextCollecting.can_transition_to(EventState::Failed));
        assert!(!EventState::Detected.can_transition_to(EventState::InsightGenerated));
        assert!(!EventState::ContextCollected.can_transition_to(EventState::Detected));
        assert!(!EventState::Failed.can_transition_to(EventState::Detected));
        assert!(!EventState::InsightGenerated.can_transition_to(EventState::Failed));
    }

    #[test]
    fn check_transition_reports_both_ends() {
        let err = EventState::Detected
            .check_transition(EventState::InsightGenerating)
            .unwrap_err();
        assert_eq!(err.to_string(), "illegal state transition DETECTED -> INSIGHT_GENERATING");
    }

    #[test]
    fn state_strings_round_trip() {
        for state in [
            EventState::Detected,
            EventState::ContextCollecting,
            EventState::ContextCollected,
            EventState::InsightGenerating,
            EventState::InsightGenerated,
            EventState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<EventState>().unwrap(), state);
        }
    }

    #[test]
    fn failure_codes_round_trip() {
        for code in [
            FailureCode::InsufficientContext,
            FailureCode::MissingContext,
            FailureCode::InsightValidationExhausted,
            FailureCode::InsightModelError,
        ] {
            assert_eq!(code.as_str().parse::<FailureCode>().unwrap(), code);
        }
        assert_eq!(FailureCode::MissingContext.to_string(), "missing_context");
    }

    #[test]
    fn event_id_is_stable_and_key_sensitive() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let a = event_id_for("sku-1", "toys", EventType::RankSurge, at);
        let b = event_id_for("sku-1", "toys", EventType::RankSurge, at);
        let c = event_id_for("sku-1", "toys", EventType::RankDrop, at);
        let d = event_id_for("sku-1", "games", EventType::RankSurge, at);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn event_type_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&EventType::ReviewSurge).unwrap();
        assert_eq!(json, "\"REVIEW_SURGE\"");
        assert_eq!("STOCK_CHANGE".parse::<EventType>().unwrap(), EventType::StockChange);
    }
}
