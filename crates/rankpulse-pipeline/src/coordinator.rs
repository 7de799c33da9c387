//! Drives events through the pipeline state machine:
//!
//! `DETECTED -> CONTEXT_COLLECTING -> CONTEXT_COLLECTED -> INSIGHT_GENERATING
//! -> INSIGHT_GENERATED`, or `FAILED` from any non-terminal state.
//!
//! Every transition is a compare-and-set on `(state, version)`. Losing one
//! means another worker owns the event, and this worker walks away.

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::stream::{self, StreamExt};
use rankpulse_context::{CallBudget, ContextOrchestrator};
use rankpulse_core::{
    rank_similar, AppConfig, ContextBundle, EventDetector, EventState, FailureCode,
    FailureReason, Insight, RankingEvent, SeriesKey, Severity, SimilarEvent,
};
use rankpulse_insight::InsightGenerator;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::detect::detect_series;
use crate::error::PipelineError;
use crate::locks::SeriesLocks;
use crate::store::PipelineStore;

const DEFAULT_BATCH_LIMIT: i64 = 200;
const MAX_STALE_AFTER_DAYS: i64 = 3650;
/// Candidates fetched per precedent slot before scoring.
const SIMILAR_CANDIDATE_FACTOR: i64 = 10;

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub detector: EventDetector,
    /// Only `DETECTED` events at or above this severity enter the pipeline.
    pub min_severity: Severity,
    /// Bundles below this completeness fail with `insufficient_context`.
    pub min_completeness: f64,
    pub max_concurrent_events: usize,
    /// In-flight events untouched for this long are reclaimed.
    pub stale_after: Duration,
    /// Source calls allowed per `run_once`, retries included.
    pub call_budget: u64,
    /// Events picked up per run.
    pub batch_limit: i64,
    /// Precedents shown to the model; 0 disables the lookup.
    pub similar_events: usize,
}

impl CoordinatorSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        let stale_after = i64::try_from(config.stale_after_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(|| Duration::days(MAX_STALE_AFTER_DAYS));
        Self {
            detector: EventDetector::new(config.thresholds, config.window),
            min_severity: config.min_pipeline_severity,
            min_completeness: config.min_completeness,
            max_concurrent_events: config.max_concurrent_events.max(1),
            stale_after,
            call_budget: config.source_call_budget,
            batch_limit: DEFAULT_BATCH_LIMIT,
            similar_events: config.insight_similar_events,
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            detector: EventDetector::default(),
            min_severity: Severity::High,
            min_completeness: 0.0,
            max_concurrent_events: 4,
            stale_after: Duration::hours(1),
            call_budget: 500,
            batch_limit: DEFAULT_BATCH_LIMIT,
            similar_events: 3,
        }
    }
}

/// How processing of one event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Generated,
    Failed(Option<FailureCode>),
    /// Another worker changed the event first.
    Skipped,
    /// Stopped at a stage boundary; the event keeps this persisted state.
    Cancelled(EventState),
}

/// Counters for one `run_once`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub detected: usize,
    pub reclaimed: usize,
    pub dispatched: usize,
    pub generated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub errors: usize,
    pub budget_attempted: u64,
    pub budget_succeeded: u64,
}

enum Step {
    Next(RankingEvent),
    Cancelled,
}

/// Why a stored bundle cannot back an insight.
enum ContextGap {
    Missing,
    Insufficient(f64),
}

pub struct PipelineCoordinator {
    store: Arc<dyn PipelineStore>,
    context: ContextOrchestrator,
    insight: InsightGenerator,
    settings: CoordinatorSettings,
    locks: SeriesLocks,
}

impl PipelineCoordinator {
    #[must_use]
    pub fn new(
        store: Arc<dyn PipelineStore>,
        context: ContextOrchestrator,
        insight: InsightGenerator,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            store,
            context,
            insight,
            settings,
            locks: SeriesLocks::default(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.store
    }

    #[must_use]
    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Detection
    // -----------------------------------------------------------------------

    /// Detects events for one series while holding that series' lock.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the store fails.
    pub async fn detect_series(&self, key: &SeriesKey) -> Result<Vec<RankingEvent>, PipelineError> {
        let _guard = self.locks.acquire(key).await;
        detect_series(self.store.as_ref(), &self.settings.detector, key).await
    }

    /// Detects events for every tracked series. A series whose detection fails
    /// is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the tracked series cannot be listed.
    pub async fn detect_all(&self) -> Result<Vec<RankingEvent>, PipelineError> {
        let series = self.store.list_tracked_series().await?;

        let results: Vec<(&SeriesKey, Result<Vec<RankingEvent>, PipelineError>)> =
            stream::iter(&series)
                .map(|key| {
                    let fut = self.detect_series(key);
                    async move { (key, fut.await) }
                })
                .buffer_unordered(self.settings.max_concurrent_events)
                .boxed()
                .collect()
                .await;

        let mut detected = Vec::new();
        for (key, result) in results {
            match result {
                Ok(events) => detected.extend(events),
                Err(e) => tracing::warn!(series = %key, error = %e, "detection failed for series"),
            }
        }
        Ok(detected)
    }

    // -----------------------------------------------------------------------
    // Per-event state machine
    // -----------------------------------------------------------------------

    /// Advances one event as far as it will go.
    ///
    /// Resumes from whatever state the event is in: a `CONTEXT_COLLECTING`
    /// event continues from its persisted partial bundle, and an
    /// `INSIGHT_GENERATING` event that already has an insight just advances.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on store failures. A lost race is reported as
    /// [`ProcessOutcome::Skipped`], not as an error.
    pub async fn process_event(
        &self,
        mut event: RankingEvent,
        budget: &Arc<CallBudget>,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, PipelineError> {
        loop {
            let step = match event.state {
                EventState::InsightGenerated => return Ok(ProcessOutcome::Generated),
                EventState::Failed => {
                    return Ok(ProcessOutcome::Failed(
                        event.failure.as_ref().map(|f| f.code),
                    ))
                }
                state if cancel.is_cancelled() => {
                    tracing::info!(event_id = %event.id, state = %state, "stopping at stage boundary");
                    return Ok(ProcessOutcome::Cancelled(state));
                }
                EventState::Detected => self.advance(&event, EventState::ContextCollecting).await,
                EventState::ContextCollecting => {
                    self.collect_context(&event, budget, cancel).await
                }
                EventState::ContextCollected => {
                    self.advance(&event, EventState::InsightGenerating).await
                }
                EventState::InsightGenerating => self.generate_insight(&event, cancel).await,
            };

            match step {
                Ok(Step::Next(next)) => event = next,
                Ok(Step::Cancelled) => {
                    tracing::info!(event_id = %event.id, state = %event.state, "stopped mid-stage");
                    return Ok(ProcessOutcome::Cancelled(event.state));
                }
                Err(PipelineError::Stale { id }) => {
                    tracing::info!(event_id = %id, "event owned by another worker; skipping");
                    return Ok(ProcessOutcome::Skipped);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn advance(&self, event: &RankingEvent, next: EventState) -> Result<Step, PipelineError> {
        let moved = self
            .store
            .transition(event.id, event.state, event.version, next)
            .await?;
        tracing::debug!(
            event_id = %event.id,
            from = %event.state,
            to = %next,
            version = moved.version,
            "event transitioned"
        );
        Ok(Step::Next(moved))
    }

    async fn fail(
        &self,
        event: &RankingEvent,
        code: FailureCode,
        message: String,
    ) -> Result<Step, PipelineError> {
        let reason = FailureReason {
            stage: event.state,
            code,
            message,
        };
        tracing::warn!(
            event_id = %event.id,
            stage = %reason.stage,
            code = %reason.code,
            message = %reason.message,
            "event failed"
        );
        let failed = self
            .store
            .fail(event.id, event.state, event.version, &reason)
            .await?;
        Ok(Step::Next(failed))
    }

    async fn collect_context(
        &self,
        event: &RankingEvent,
        budget: &Arc<CallBudget>,
        cancel: &CancellationToken,
    ) -> Result<Step, PipelineError> {
        let prior = self.store.get_bundle(event.id).await?;
        let collected = self.context.collect(event, prior, budget, cancel).await;
        // The merged row is authoritative; another pass may have written first.
        let bundle = self
            .store
            .save_bundle(&collected, &self.context.source_names())
            .await?;

        if cancel.is_cancelled() {
            return Ok(Step::Cancelled);
        }

        if bundle.completeness < self.settings.min_completeness {
            return self
                .fail(
                    event,
                    FailureCode::InsufficientContext,
                    self.insufficient_message(bundle.completeness),
                )
                .await;
        }

        self.advance(event, EventState::ContextCollected).await
    }

    fn insufficient_message(&self, completeness: f64) -> String {
        format!(
            "context completeness {completeness:.2} is below the minimum {:.2}",
            self.settings.min_completeness
        )
    }

    /// Loads the stored bundle and checks it still clears `min_completeness`.
    async fn usable_bundle(
        &self,
        event_id: Uuid,
    ) -> Result<Result<ContextBundle, ContextGap>, PipelineError> {
        let Some(bundle) = self.store.get_bundle(event_id).await? else {
            return Ok(Err(ContextGap::Missing));
        };
        if bundle.completeness < self.settings.min_completeness {
            return Ok(Err(ContextGap::Insufficient(bundle.completeness)));
        }
        Ok(Ok(bundle))
    }

    /// Best-effort precedent lookup; a store failure yields none.
    async fn similar_events(&self, event: &RankingEvent) -> Vec<SimilarEvent> {
        let wanted = self.settings.similar_events;
        if wanted == 0 {
            return Vec::new();
        }
        let pool = i64::try_from(wanted)
            .unwrap_or(i64::MAX)
            .saturating_mul(SIMILAR_CANDIDATE_FACTOR);
        match self.store.similar_candidates(event, pool).await {
            Ok(candidates) => {
                let similar = rank_similar(event, candidates, wanted);
                tracing::debug!(event_id = %event.id, found = similar.len(), "similar events ranked");
                similar
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %event.id,
                    error = %e,
                    "similar event lookup failed; continuing without"
                );
                Vec::new()
            }
        }
    }

    async fn generate_insight(
        &self,
        event: &RankingEvent,
        cancel: &CancellationToken,
    ) -> Result<Step, PipelineError> {
        if self.store.get_current_insight(event.id).await?.is_some() {
            tracing::debug!(event_id = %event.id, "insight already stored; advancing");
            return self.advance(event, EventState::InsightGenerated).await;
        }

        let bundle = match self.usable_bundle(event.id).await? {
            Ok(bundle) => bundle,
            Err(ContextGap::Missing) => {
                return self
                    .fail(
                        event,
                        FailureCode::MissingContext,
                        "no context bundle is stored for this event".to_string(),
                    )
                    .await;
            }
            Err(ContextGap::Insufficient(completeness)) => {
                return self
                    .fail(
                        event,
                        FailureCode::InsufficientContext,
                        self.insufficient_message(completeness),
                    )
                    .await;
            }
        };
        let similar = self.similar_events(event).await;

        let generated = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(Step::Cancelled),
            result = self.insight.generate(event, &bundle, &similar) => result,
        };

        match generated {
            Ok(insight) => {
                self.store.insert_insight(&insight).await?;
                self.advance(event, EventState::InsightGenerated).await
            }
            Err(failure) => self.fail(event, failure.code, failure.to_string()).await,
        }
    }

    // -----------------------------------------------------------------------
    // Runs and operator actions
    // -----------------------------------------------------------------------

    /// One full pass: detect, reclaim stale events, then process every
    /// eligible event through a bounded worker pool sharing one call budget.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the work queue cannot be read. Failures of
    /// individual events are counted in [`RunSummary::errors`].
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary {
            detected: self.detect_all().await?.len(),
            ..RunSummary::default()
        };

        if cancel.is_cancelled() {
            return Ok(summary);
        }

        let mut work = self
            .store
            .list_detected_events(self.settings.min_severity, self.settings.batch_limit)
            .await?;

        let cutoff = Utc::now() - self.settings.stale_after;
        for stale in self
            .store
            .list_stale_events(cutoff, self.settings.batch_limit)
            .await?
        {
            match self
                .store
                .reclaim(stale.id, stale.state, stale.version)
                .await
            {
                Ok(reclaimed) => {
                    tracing::warn!(
                        event_id = %reclaimed.id,
                        state = %reclaimed.state,
                        since = %stale.state_changed_at,
                        "reclaimed stale in-flight event"
                    );
                    summary.reclaimed += 1;
                    work.push(reclaimed);
                }
                Err(PipelineError::Stale { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        summary.dispatched = work.len();
        let budget = Arc::new(CallBudget::new(self.settings.call_budget));

        let outcomes: Vec<(Uuid, Result<ProcessOutcome, PipelineError>)> = stream::iter(work)
            .map(|event| {
                let id = event.id;
                let fut = self.process_event(event, &budget, cancel);
                async move { (id, fut.await) }
            })
            .buffer_unordered(self.settings.max_concurrent_events)
            .collect()
            .await;

        for (id, outcome) in outcomes {
            match outcome {
                Ok(ProcessOutcome::Generated) => summary.generated += 1,
                Ok(ProcessOutcome::Failed(_)) => summary.failed += 1,
                Ok(ProcessOutcome::Skipped) => summary.skipped += 1,
                Ok(ProcessOutcome::Cancelled(_)) => summary.cancelled += 1,
                Err(e) => {
                    tracing::error!(event_id = %id, error = %e, "event processing error");
                    summary.errors += 1;
                }
            }
        }
        summary.budget_attempted = budget.attempted();
        summary.budget_succeeded = budget.succeeded();

        tracing::info!(
            detected = summary.detected,
            reclaimed = summary.reclaimed,
            dispatched = summary.dispatched,
            generated = summary.generated,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            errors = summary.errors,
            budget_attempted = summary.budget_attempted,
            budget_limit = budget.limit(),
            "pipeline run finished"
        );
        Ok(summary)
    }

    /// Moves a `FAILED` event back to `DETECTED`. Never done automatically.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotFound`] for an unknown id, [`PipelineError::Stale`]
    /// when the event is not `FAILED`.
    pub async fn requeue_failed(&self, id: Uuid) -> Result<RankingEvent, PipelineError> {
        let event = self.store.requeue_failed(id).await?;
        tracing::info!(event_id = %id, "failed event requeued");
        Ok(event)
    }

    /// Generates a fresh insight for an event that already has one. The
    /// previous insight is kept as history.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidState`] unless the event is `INSIGHT_GENERATED`,
    /// [`PipelineError::MissingContext`] or [`PipelineError::InsufficientContext`]
    /// when the stored bundle cannot back an insight, and
    /// [`PipelineError::Insight`] if generation fails. The current insight
    /// stays in place on every error.
    pub async fn regenerate_insight(&self, id: Uuid) -> Result<Insight, PipelineError> {
        let event = self
            .store
            .get_event(id)
            .await?
            .ok_or(PipelineError::NotFound)?;
        if event.state != EventState::InsightGenerated {
            return Err(PipelineError::InvalidState {
                id,
                expected: EventState::InsightGenerated,
                actual: event.state,
            });
        }

        let bundle = match self.usable_bundle(id).await? {
            Ok(bundle) => bundle,
            Err(ContextGap::Missing) => return Err(PipelineError::MissingContext { id }),
            Err(ContextGap::Insufficient(completeness)) => {
                return Err(PipelineError::InsufficientContext {
                    id,
                    completeness,
                    minimum: self.settings.min_completeness,
                })
            }
        };
        let similar = self.similar_events(&event).await;
        let insight = self.insight.generate(&event, &bundle, &similar).await?;
        self.store.insert_insight(&insight).await?;
        tracing::info!(event_id = %id, insight_id = %insight.id, "insight regenerated");
        Ok(insight)
    }
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod tests;
