//! Per-event context gathered from every configured source.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CoreError;

/// One piece of evidence returned by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Source-assigned relevance; higher sorts first when building prompts.
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFailure {
    /// The source returned an error that retrying cannot fix.
    SourceError,
    /// Every retry was spent on retriable errors.
    RetriesExhausted,
    /// The shared call budget ran out before the source succeeded.
    BudgetExhausted,
    /// Collection was aborted by an operator.
    Cancelled,
}

impl SourceFailure {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SourceFailure::SourceError => "source_error",
            SourceFailure::RetriesExhausted => "retries_exhausted",
            SourceFailure::BudgetExhausted => "budget_exhausted",
            SourceFailure::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SourceFailure {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source_error" => Ok(SourceFailure::SourceError),
            "retries_exhausted" => Ok(SourceFailure::RetriesExhausted),
            "budget_exhausted" => Ok(SourceFailure::BudgetExhausted),
            "cancelled" => Ok(SourceFailure::Cancelled),
            other => Err(CoreError::UnknownSourceFailure(other.to_string())),
        }
    }
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of collecting from a single source. The `status` tag is the
/// persisted discriminant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceResult {
    Ok {
        items: Vec<ContextItem>,
        attempts: u32,
    },
    Failed {
        reason: SourceFailure,
        error: String,
        attempts: u32,
    },
    TimedOut {
        error: String,
        attempts: u32,
    },
}

impl SourceResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, SourceResult::Ok { .. })
    }

    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            SourceResult::Ok { .. } => "ok",
            SourceResult::Failed { .. } => "failed",
            SourceResult::TimedOut { .. } => "timed_out",
        }
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            SourceResult::Ok { attempts, .. }
            | SourceResult::Failed { attempts, .. }
            | SourceResult::TimedOut { attempts, .. } => *attempts,
        }
    }

    #[must_use]
    pub fn items(&self) -> &[ContextItem] {
        match self {
            SourceResult::Ok { items, .. } => items,
            _ => &[],
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            SourceResult::Ok { .. } => None,
            SourceResult::Failed { error, .. } | SourceResult::TimedOut { error, .. } => {
                Some(error)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub event_id: Uuid,
    pub per_source: BTreeMap<String, SourceResult>,
    /// Share of configured sources that returned `Ok`, in `[0, 1]`.
    pub completeness: f64,
    pub collected_at: DateTime<Utc>,
}

impl ContextBundle {
    #[must_use]
    pub fn empty(event_id: Uuid, collected_at: DateTime<Utc>) -> Self {
        Self {
            event_id,
            per_source: BTreeMap::new(),
            completeness: 0.0,
            collected_at,
        }
    }

    /// Recomputes `completeness` against the configured source names.
    ///
    /// Results for sources no longer configured are kept but do not count.
    pub fn recompute_completeness(&mut self, configured: &[String]) {
        self.completeness = completeness(&self.per_source, configured);
    }

    /// Folds a later collection pass into this bundle.
    ///
    /// A stored `Ok` result is kept; any other stored result is replaced.
    /// `collected_at` keeps the later of the two times and completeness is
    /// recomputed from the merged results, never taken from `newer`.
    pub fn merge(&mut self, newer: &ContextBundle, configured: &[String]) {
        for (name, result) in &newer.per_source {
            if !self.per_source.get(name).is_some_and(SourceResult::is_ok) {
                self.per_source.insert(name.clone(), result.clone());
            }
        }
        self.collected_at = self.collected_at.max(newer.collected_at);
        self.recompute_completeness(configured);
    }

    /// Configured sources that still lack an `Ok` result.
    #[must_use]
    pub fn pending_sources<'a>(&self, configured: &'a [String]) -> Vec<&'a str> {
        configured
            .iter()
            .filter(|name| !self.per_source.get(*name).is_some_and(SourceResult::is_ok))
            .map(String::as_str)
            .collect()
    }

    #[must_use]
    pub fn is_complete(&self, configured: &[String]) -> bool {
        self.pending_sources(configured).is_empty()
    }
}

/// An empty source list is vacuously complete.
#[must_use]
pub fn completeness(per_source: &BTreeMap<String, SourceResult>, configured: &[String]) -> f64 {
    if configured.is_empty() {
        return 1.0;
    }
    let ok = configured
        .iter()
        .filter(|name| per_source.get(*name).is_some_and(SourceResult::is_ok))
        .count();
    #[allow(clippy::cast_precision_loss)]
    let ratio = ok as f64 / configured.len() as f64;
    ratio
}
