//! Extraction and validation of the model's JSON answer.

use rankpulse_core::{Cause, Priority, Recommendation};
use serde_json::{Map, Value};

const MAX_CAUSES: usize = 3;

/// A model answer that passed every structural check.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedInsight {
    pub summary: String,
    pub analysis: Option<String>,
    pub causes: Vec<Cause>,
    pub recommendations: Vec<Recommendation>,
    pub confidence_score: f64,
}

/// Locates the JSON object inside a model response.
///
/// Accepts a bare object, a fenced ```` ```json ```` block, or an object
/// preceded or followed by prose.
#[must_use]
pub fn extract_json(raw: &str) -> Option<&str> {
    let text = raw.trim();
    if let Some(fence) = text.find("```") {
        let after = &text[fence + 3..];
        // Skip the language tag on the opening fence line.
        let body_start = after.find('\n').map_or(0, |i| i + 1);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            let inner = body[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn non_empty_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn unit_interval(obj: &Map<String, Value>, key: &str) -> Result<f64, String> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(format!("{key} is required")),
        Some(value) => match value.as_f64() {
            Some(n) if (0.0..=1.0).contains(&n) => Ok(n),
            Some(n) => Err(format!("{key} must be between 0 and 1, got {n}")),
            None => Err(format!("{key} must be a number")),
        },
    }
}

fn validate_cause(index: usize, value: &Value, problems: &mut Vec<String>) -> Option<Cause> {
    let Some(obj) = value.as_object() else {
        problems.push(format!("causes[{index}] must be an object"));
        return None;
    };
    let cause = non_empty_str(obj, "cause");
    if cause.is_none() {
        problems.push(format!("causes[{index}].cause must be a non-empty string"));
    }
    let evidence = non_empty_str(obj, "evidence");
    if evidence.is_none() {
        problems.push(format!("causes[{index}].evidence must be a non-empty string"));
    }
    let confidence = unit_interval(obj, "confidence")
        .map_err(|e| problems.push(format!("causes[{index}].{e}")))
        .ok();

    Some(Cause {
        cause: cause?,
        evidence: evidence?,
        confidence: confidence?,
    })
}

fn validate_recommendation(
    index: usize,
    value: &Value,
    problems: &mut Vec<String>,
) -> Option<Recommendation> {
    let Some(obj) = value.as_object() else {
        problems.push(format!("recommendations[{index}] must be an object"));
        return None;
    };
    let action = non_empty_str(obj, "action");
    if action.is_none() {
        problems.push(format!(
            "recommendations[{index}].action must be a non-empty string"
        ));
    }
    let priority = obj
        .get("priority")
        .and_then(Value::as_str)
        .and_then(|p| p.trim().to_ascii_lowercase().parse::<Priority>().ok());
    if priority.is_none() {
        problems.push(format!(
            "recommendations[{index}].priority must be one of high, medium, low"
        ));
    }
    let expected_impact =
        non_empty_str(obj, "expected_impact").or_else(|| non_empty_str(obj, "rationale"));

    Some(Recommendation {
        action: action?,
        priority: priority?,
        expected_impact,
    })
}

/// Parses and checks a raw model response.
///
/// # Errors
///
/// Returns every problem found, phrased so it can be sent back to the model
/// as a correction.
pub fn validate_response(raw: &str) -> Result<ValidatedInsight, Vec<String>> {
    let Some(json) = extract_json(raw) else {
        return Err(vec!["response must contain a JSON object".to_string()]);
    };
    let value: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => return Err(vec![format!("response is not valid JSON: {e}")]),
    };
    let Some(root) = value.as_object() else {
        return Err(vec!["response must be a JSON object".to_string()]);
    };

    let mut problems = Vec::new();

    let summary = non_empty_str(root, "summary");
    if summary.is_none() {
        problems.push("summary must be a non-empty string".to_string());
    }
    let analysis = non_empty_str(root, "analysis");

    let mut causes = Vec::new();
    match root
        .get("causes")
        .or_else(|| root.get("likely_causes"))
        .and_then(Value::as_array)
    {
        None => problems.push("causes must be an array of 1 to 3 entries".to_string()),
        Some(list) if list.is_empty() || list.len() > MAX_CAUSES => problems.push(format!(
            "causes must contain 1 to {MAX_CAUSES} entries, got {}",
            list.len()
        )),
        Some(list) => {
            causes = list
                .iter()
                .enumerate()
                .filter_map(|(i, c)| validate_cause(i, c, &mut problems))
                .collect();
        }
    }

    let mut recommendations = Vec::new();
    match root.get("recommendations").and_then(Value::as_array) {
        None => problems.push("recommendations must be an array".to_string()),
        Some(list) => {
            recommendations = list
                .iter()
                .enumerate()
                .filter_map(|(i, r)| validate_recommendation(i, r, &mut problems))
                .collect();
        }
    }

    let confidence_score = unit_interval(root, "confidence_score")
        .map_err(|e| problems.push(e))
        .ok();

    match (summary, confidence_score) {
        (Some(summary), Some(confidence_score)) if problems.is_empty() => Ok(ValidatedInsight {
            summary,
            analysis,
            causes,
            recommendations,
            confidence_score,
        }),
        _ => Err(problems),
    }
}
