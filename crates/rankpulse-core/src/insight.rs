use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::similar::SimilarMatch;
use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(CoreError::UnknownPriority(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cause {
    pub cause: String,
    pub evidence: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: String,
    pub priority: Priority,
    #[serde(default)]
    pub expected_impact: Option<String>,
}

/// A validated causal explanation for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: Uuid,
    pub event_id: Uuid,
    pub summary: String,
    pub analysis: Option<String>,
    pub causes: Vec<Cause>,
    pub recommendations: Vec<Recommendation>,
    /// Overall confidence in `[0, 1]`, as reported by the model.
    pub confidence_score: f64,
    pub model_id: String,
    pub prompt_version: String,
    /// Model calls spent producing this insight.
    pub attempts: u32,
    /// Past events shown to the model as precedents.
    #[serde(default)]
    pub similar_events: Vec<SimilarMatch>,
    pub generated_at: DateTime<Utc>,
}
