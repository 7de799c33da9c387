//! Prompt construction.
//!
//! The user prompt is a pure function of the event, the bundle, the
//! configured source names and the precedents, so re-running generation on
//! unchanged inputs sends byte-identical text.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use rankpulse_core::{
    ContextBundle, ContextItem, RankingEvent, SimilarEvent, Snapshot, SourceResult,
};

/// Bumped whenever the prompt text or expected schema changes.
pub const PROMPT_VERSION: &str = "1.1";

const ABSENT: &str = "(absent)";
const BODY_PREVIEW_CHARS: usize = 280;

pub const SYSTEM_PROMPT: &str = "You are an expert e-commerce data analyst. \
You analyse marketplace ranking change events, identify their most likely causes from \
the supplied context, and give concrete, actionable recommendations.

When analysing:
- base every claim on the supplied data and cite it as evidence
- consider several contributing factors (social media, reviews, price, competitors, stock)
- distinguish correlation from causation
- lower your confidence when context is missing or sources failed
- use similar past events as precedent, not as evidence for this one

Respond with a single JSON object and nothing else.";

pub const SCHEMA_HINT: &str = r#"{
  "summary": "one or two sentence key insight",
  "analysis": "detailed analysis, optional",
  "causes": [
    {"cause": "what happened", "evidence": "which context item supports it", "confidence": 0.8}
  ],
  "recommendations": [
    {"action": "what to do", "priority": "high|medium|low", "expected_impact": "optional"}
  ],
  "confidence_score": 0.75
}
causes: 1 to 3 entries. confidence and confidence_score: numbers between 0 and 1."#;

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn or_absent<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| ABSENT.to_string(), |v| v.to_string())
}

fn write_snapshot(out: &mut String, label: &str, snapshot: &Snapshot) {
    let _ = writeln!(out, "\n### {label} snapshot");
    let _ = writeln!(out, "- observed_at: {}", timestamp(snapshot.observed_at));
    let _ = writeln!(out, "- rank: {}", snapshot.rank);
    let _ = writeln!(out, "- price: {}", or_absent(snapshot.price));
    let _ = writeln!(out, "- rating: {}", or_absent(snapshot.rating));
    let _ = writeln!(out, "- review_count: {}", or_absent(snapshot.review_count));
    let _ = writeln!(out, "- stock_status: {}", or_absent(snapshot.stock_status));
}

/// Score descending (unscored last), then id ascending.
fn item_order(a: &ContextItem, b: &ContextItem) -> Ordering {
    match (a.score, b.score) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id))
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= BODY_PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(BODY_PREVIEW_CHARS).collect();
    format!("{cut}...")
}

fn write_item(out: &mut String, item: &ContextItem) {
    let _ = writeln!(out, "- [{}] {}", item.id, item.title.trim());
    let _ = writeln!(
        out,
        "  score: {}, occurred_at: {}, url: {}",
        item.score.map_or_else(|| ABSENT.to_string(), |s| format!("{s:.2}")),
        or_absent(item.occurred_at.map(timestamp)),
        or_absent(item.url.as_deref()),
    );
    if let Some(body) = item.body.as_deref().filter(|b| !b.trim().is_empty()) {
        let _ = writeln!(out, "  body: {}", preview(body));
    }
    if !item.attributes.is_null() {
        let _ = writeln!(out, "  attributes: {}", item.attributes);
    }
}

fn write_source(out: &mut String, name: &str, result: Option<&SourceResult>, top_items: usize) {
    let _ = writeln!(out, "\n### Source: {name}");
    let Some(result) = result else {
        let _ = writeln!(out, "- status: {ABSENT}");
        return;
    };
    let _ = writeln!(out, "- status: {}", result.status());
    let _ = writeln!(out, "- attempts: {}", result.attempts());
    match result {
        SourceResult::Ok { items, .. } => {
            let mut ranked: Vec<&ContextItem> = items.iter().collect();
            ranked.sort_by(|a, b| item_order(a, b));
            let _ = writeln!(
                out,
                "- items: {} (showing {})",
                items.len(),
                ranked.len().min(top_items)
            );
            for item in ranked.into_iter().take(top_items) {
                write_item(out, item);
            }
        }
        SourceResult::Failed { reason, error, .. } => {
            let _ = writeln!(out, "- reason: {reason}");
            let _ = writeln!(out, "- error: {error}");
        }
        SourceResult::TimedOut { error, .. } => {
            let _ = writeln!(out, "- error: {error}");
        }
    }
}

fn write_similar(out: &mut String, similar: &[SimilarEvent]) {
    let _ = writeln!(out, "\n## Similar past events");
    if similar.is_empty() {
        let _ = writeln!(out, "{ABSENT}");
        return;
    }
    for past in similar {
        let _ = writeln!(
            out,
            "- [{}] {} {} for {} in {}",
            past.event_id, past.severity, past.event_type, past.entity_id, past.category_id
        );
        let _ = writeln!(
            out,
            "  similarity: {:.2}, magnitude_pct: {}, detected_at: {}",
            past.similarity,
            past.magnitude_pct
                .map_or_else(|| ABSENT.to_string(), |m| format!("{m:.1}")),
            timestamp(past.detected_at),
        );
        let _ = writeln!(
            out,
            "  insight: {}",
            or_absent(past.summary.as_deref().map(preview))
        );
    }
}

/// Renders the user prompt for one event.
///
/// Sources appear in name order: every configured source, plus any other
/// source already recorded in the bundle.
#[must_use]
pub fn build_user_prompt(
    event: &RankingEvent,
    bundle: &ContextBundle,
    configured: &[String],
    similar: &[SimilarEvent],
    top_items: usize,
) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "## Event to analyse");
    let _ = writeln!(out, "- event_id: {}", event.id);
    let _ = writeln!(out, "- event_type: {}", event.event_type);
    let _ = writeln!(out, "- severity: {}", event.severity);
    let _ = writeln!(out, "- entity_id: {}", event.entity_id);
    let _ = writeln!(out, "- category_id: {}", event.category_id);
    let _ = writeln!(
        out,
        "- magnitude_pct: {}",
        event
            .magnitude_pct
            .map_or_else(|| ABSENT.to_string(), |m| format!("{m:.1}"))
    );
    let _ = writeln!(out, "- detected_at: {}", timestamp(event.detected_at));
    let _ = writeln!(
        out,
        "- window: {} to {}",
        timestamp(event.window.start),
        timestamp(event.window.end)
    );

    write_snapshot(&mut out, "Previous", &event.prev_snapshot);
    write_snapshot(&mut out, "Current", &event.curr_snapshot);

    let names: BTreeSet<&str> = configured
        .iter()
        .map(String::as_str)
        .chain(bundle.per_source.keys().map(String::as_str))
        .collect();

    let _ = writeln!(out, "\n## Context");
    let _ = writeln!(out, "- completeness: {:.2}", bundle.completeness);
    let _ = writeln!(out, "- collected_at: {}", timestamp(bundle.collected_at));
    for name in names {
        write_source(&mut out, name, bundle.per_source.get(name), top_items);
    }

    write_similar(&mut out, similar);

    let _ = writeln!(out, "\n## Request");
    let _ = writeln!(
        out,
        "Using the data above, identify the most likely causes of this change, \
         rate your confidence in each, and recommend concrete actions."
    );
    let _ = write!(out, "Respond with JSON only, matching this schema:\n{SCHEMA_HINT}");
    out
}

/// Appends a correction instruction listing validation problems to the
/// original prompt.
#[must_use]
pub fn correction_prompt(base: &str, problems: &[String]) -> String {
    let mut out = String::from(base);
    let _ = writeln!(out, "\n\n## Correction");
    let _ = writeln!(out, "Your previous response was rejected:");
    for problem in problems {
        let _ = writeln!(out, "- {problem}");
    }
    let _ = write!(
        out,
        "Respond again with a single JSON object that fixes every problem above."
    );
    out
}
