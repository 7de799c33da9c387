use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rankpulse_core::{
    AppConfig, ContextBundle, FailureCode, Insight, RankingEvent, SimilarEvent, SimilarMatch,
};
use thiserror::Error;
use uuid::Uuid;

use crate::client::{GenerationRequest, TextGenerator};
use crate::prompt::{build_user_prompt, correction_prompt, PROMPT_VERSION, SCHEMA_HINT, SYSTEM_PROMPT};
use crate::schema::validate_response;

const MAX_BACKOFF_MS: u64 = 30_000;

/// Generation gave up after spending every attempt.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("insight generation failed ({code}) after {attempts} attempt(s): {last_error}")]
pub struct InsightFailure {
    pub code: FailureCode,
    pub attempts: u32,
    pub last_error: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorSettings {
    /// Extra attempts after the first; a bad answer or a model error each use one.
    pub max_reprompts: u32,
    pub call_timeout: Duration,
    /// Items rendered per source, best first.
    pub top_items: usize,
    /// Base delay before retrying after a model error.
    pub backoff_base_ms: u64,
}

impl GeneratorSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_reprompts: config.insight_max_reprompts,
            call_timeout: Duration::from_secs(config.insight_timeout_secs),
            top_items: config.insight_top_items,
            backoff_base_ms: config.source_backoff_base_ms,
        }
    }
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            max_reprompts: 2,
            call_timeout: Duration::from_secs(120),
            top_items: 5,
            backoff_base_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastFailure {
    Validation,
    Model,
}

fn backoff_ms(base: u64, attempt: u32) -> u64 {
    let computed = base
        .saturating_mul(1u64 << attempt.saturating_sub(1).min(10))
        .min(MAX_BACKOFF_MS);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let jittered = (computed as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
    jittered
}

/// Turns an event and its context into a validated [`Insight`].
#[derive(Clone)]
pub struct InsightGenerator {
    model: Arc<dyn TextGenerator>,
    settings: GeneratorSettings,
    sources: Vec<String>,
}

impl InsightGenerator {
    /// `sources` are the configured source names; each is listed in the
    /// prompt even when the bundle has no result for it.
    #[must_use]
    pub fn new(
        model: Arc<dyn TextGenerator>,
        settings: GeneratorSettings,
        sources: Vec<String>,
    ) -> Self {
        Self {
            model,
            settings,
            sources,
        }
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Generates an insight, re-prompting with the list of problems whenever
    /// the answer fails validation. `similar` are precedents shown to the
    /// model; they are recorded on the insight.
    ///
    /// # Errors
    ///
    /// Returns [`InsightFailure`] with `insight_validation_exhausted` when the
    /// last attempt produced an invalid answer, or `insight_model_error` when it
    /// failed at the model call itself.
    pub async fn generate(
        &self,
        event: &RankingEvent,
        bundle: &ContextBundle,
        similar: &[SimilarEvent],
    ) -> Result<Insight, InsightFailure> {
        let base_prompt = build_user_prompt(
            event,
            bundle,
            &self.sources,
            similar,
            self.settings.top_items,
        );
        let total_attempts = self.settings.max_reprompts.saturating_add(1);
        let mut request = GenerationRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: base_prompt.clone(),
            schema_hint: SCHEMA_HINT.to_string(),
        };
        let mut last = (LastFailure::Model, String::new());

        for attempt in 1..=total_attempts {
            let outcome =
                tokio::time::timeout(self.settings.call_timeout, self.model.generate(&request))
                    .await;

            let raw = match outcome {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) => {
                    last = (LastFailure::Model, e.to_string());
                    self.pause_after_model_error(event, attempt, total_attempts, &last.1)
                        .await;
                    continue;
                }
                Err(_) => {
                    last = (
                        LastFailure::Model,
                        format!(
                            "model call timed out after {}ms",
                            self.settings.call_timeout.as_millis()
                        ),
                    );
                    self.pause_after_model_error(event, attempt, total_attempts, &last.1)
                        .await;
                    continue;
                }
            };

            match validate_response(&raw) {
                Ok(valid) => {
                    tracing::info!(
                        event_id = %event.id,
                        model = self.model.model_id(),
                        attempt,
                        confidence = valid.confidence_score,
                        "insight generated"
                    );
                    return Ok(Insight {
                        id: Uuid::new_v4(),
                        event_id: event.id,
                        summary: valid.summary,
                        analysis: valid.analysis,
                        causes: valid.causes,
                        recommendations: valid.recommendations,
                        confidence_score: valid.confidence_score,
                        model_id: self.model.model_id().to_string(),
                        prompt_version: PROMPT_VERSION.to_string(),
                        attempts: attempt,
                        similar_events: similar.iter().map(SimilarMatch::from).collect(),
                        generated_at: Utc::now(),
                    });
                }
                Err(problems) => {
                    tracing::warn!(
                        event_id = %event.id,
                        attempt,
                        problems = problems.len(),
                        first_problem = problems.first().map(String::as_str).unwrap_or_default(),
                        "model answer failed validation"
                    );
                    last = (LastFailure::Validation, problems.join("; "));
                    request.prompt = correction_prompt(&base_prompt, &problems);
                }
            }
        }

        let code = match last.0 {
            LastFailure::Validation => FailureCode::InsightValidationExhausted,
            LastFailure::Model => FailureCode::InsightModelError,
        };
        tracing::error!(
            event_id = %event.id,
            code = %code,
            attempts = total_attempts,
            error = %last.1,
            "insight generation exhausted"
        );
        Err(InsightFailure {
            code,
            attempts: total_attempts,
            last_error: last.1,
        })
    }

    async fn pause_after_model_error(
        &self,
        event: &RankingEvent,
        attempt: u32,
        total_attempts: u32,
        error: &str,
    ) {
        tracing::warn!(event_id = %event.id, attempt, error, "model call failed");
        if attempt < total_attempts {
            let delay = backoff_ms(self.settings.backoff_base_ms, attempt);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[cfg(test)]
#[path = "generator_test.rs"]
mod tests;
