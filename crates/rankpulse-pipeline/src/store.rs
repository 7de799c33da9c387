//! Persistence seam for the coordinator.
//!
//! [`PgStore`] delegates to `rankpulse-db`. With the `test-util` feature,
//! `MemoryStore` keeps the same contract in process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rankpulse_core::{
    ContextBundle, EventState, FailureReason, Insight, RankingEvent, SeriesKey, Severity, Snapshot,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::PipelineError;

/// Latest two snapshots of a series, oldest first.
pub type SnapshotPair = (Option<Snapshot>, Snapshot);

#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn list_tracked_series(&self) -> Result<Vec<SeriesKey>, PipelineError>;

    async fn latest_snapshot_pair(
        &self,
        key: &SeriesKey,
    ) -> Result<Option<SnapshotPair>, PipelineError>;

    /// Returns `false` when an event with the same identity already exists.
    async fn insert_event_if_absent(&self, event: &RankingEvent) -> Result<bool, PipelineError>;

    async fn get_event(&self, id: Uuid) -> Result<Option<RankingEvent>, PipelineError>;

    /// `DETECTED` events at or above `min_severity`, oldest first.
    async fn list_detected_events(
        &self,
        min_severity: Severity,
        limit: i64,
    ) -> Result<Vec<RankingEvent>, PipelineError>;

    /// In-flight events whose state has not changed since `older_than`.
    async fn list_stale_events(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RankingEvent>, PipelineError>;

    /// Compare-and-set state change.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Stale`] when the stored state or version differs.
    async fn transition(
        &self,
        id: Uuid,
        expected_state: EventState,
        expected_version: i64,
        next: EventState,
    ) -> Result<RankingEvent, PipelineError>;

    async fn fail(
        &self,
        id: Uuid,
        expected_state: EventState,
        expected_version: i64,
        reason: &FailureReason,
    ) -> Result<RankingEvent, PipelineError>;

    /// Takes ownership of a stuck event by bumping its version.
    async fn reclaim(
        &self,
        id: Uuid,
        expected_state: EventState,
        expected_version: i64,
    ) -> Result<RankingEvent, PipelineError>;

    async fn requeue_failed(&self, id: Uuid) -> Result<RankingEvent, PipelineError>;

    async fn get_bundle(&self, event_id: Uuid) -> Result<Option<ContextBundle>, PipelineError>;

    /// Merges a bundle into storage and returns the stored result.
    ///
    /// A stored `Ok` source result is never replaced, and completeness is
    /// recomputed from the merged results against `configured`.
    async fn save_bundle(
        &self,
        bundle: &ContextBundle,
        configured: &[String],
    ) -> Result<ContextBundle, PipelineError>;

    async fn get_current_insight(&self, event_id: Uuid)
        -> Result<Option<Insight>, PipelineError>;

    /// Stores a new current insight; earlier ones are kept as history.
    async fn insert_insight(&self, insight: &Insight) -> Result<(), PipelineError>;

    /// Analysed events sharing the type or category of `event`, newest first,
    /// each with the summary of its current insight.
    async fn similar_candidates(
        &self,
        event: &RankingEvent,
        limit: i64,
    ) -> Result<Vec<(RankingEvent, Option<String>)>, PipelineError>;
}

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PipelineStore for PgStore {
    async fn list_tracked_series(&self) -> Result<Vec<SeriesKey>, PipelineError> {
        Ok(rankpulse_db::list_tracked_series(&self.pool, None).await?)
    }

    async fn latest_snapshot_pair(
        &self,
        key: &SeriesKey,
    ) -> Result<Option<SnapshotPair>, PipelineError> {
        Ok(rankpulse_db::latest_snapshot_pair(&self.pool, key).await?)
    }

    async fn insert_event_if_absent(&self, event: &RankingEvent) -> Result<bool, PipelineError> {
        Ok(rankpulse_db::insert_event_if_absent(&self.pool, event).await?)
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<RankingEvent>, PipelineError> {
        Ok(rankpulse_db::get_event(&self.pool, id).await?)
    }

    async fn list_detected_events(
        &self,
        min_severity: Severity,
        limit: i64,
    ) -> Result<Vec<RankingEvent>, PipelineError> {
        Ok(rankpulse_db::list_events_in_states(
            &self.pool,
            &[EventState::Detected],
            min_severity,
            limit,
        )
        .await?)
    }

    async fn list_stale_events(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RankingEvent>, PipelineError> {
        Ok(rankpulse_db::list_stale_events(&self.pool, older_than, limit).await?)
    }

    async fn transition(
        &self,
        id: Uuid,
        expected_state: EventState,
        expected_version: i64,
        next: EventState,
    ) -> Result<RankingEvent, PipelineError> {
        Ok(
            rankpulse_db::transition_event_state(
                &self.pool,
                id,
                expected_state,
                expected_version,
                next,
            )
            .await?,
        )
    }

    async fn fail(
        &self,
        id: Uuid,
        expected_state: EventState,
        expected_version: i64,
        reason: &FailureReason,
    ) -> Result<RankingEvent, PipelineError> {
        Ok(rankpulse_db::fail_event(&self.pool, id, expected_state, expected_version, reason).await?)
    }

    async fn reclaim(
        &self,
        id: Uuid,
        expected_state: EventState,
        expected_version: i64,
    ) -> Result<RankingEvent, PipelineError> {
        Ok(rankpulse_db::reclaim_event(&self.pool, id, expected_state, expected_version).await?)
    }

    async fn requeue_failed(&self, id: Uuid) -> Result<RankingEvent, PipelineError> {
        Ok(rankpulse_db::requeue_failed_event(&self.pool, id).await?)
    }

    async fn get_bundle(&self, event_id: Uuid) -> Result<Option<ContextBundle>, PipelineError> {
        Ok(rankpulse_db::get_bundle(&self.pool, event_id).await?)
    }

    async fn save_bundle(
        &self,
        bundle: &ContextBundle,
        configured: &[String],
    ) -> Result<ContextBundle, PipelineError> {
        Ok(rankpulse_db::save_bundle(&self.pool, bundle, configured).await?)
    }

    async fn get_current_insight(
        &self,
        event_id: Uuid,
    ) -> Result<Option<Insight>, PipelineError> {
        Ok(rankpulse_db::get_current_insight(&self.pool, event_id).await?)
    }

    async fn insert_insight(&self, insight: &Insight) -> Result<(), PipelineError> {
        Ok(rankpulse_db::insert_insight(&self.pool, insight).await?)
    }

    async fn similar_candidates(
        &self,
        event: &RankingEvent,
        limit: i64,
    ) -> Result<Vec<(RankingEvent, Option<String>)>, PipelineError> {
        Ok(rankpulse_db::list_similar_candidates(&self.pool, event, limit).await?)
    }
}
