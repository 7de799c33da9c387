//! In-process store for exercising the coordinator without Postgres.
//!
//! Compiled for this crate's tests and, for downstream crates, behind the
//! `test-util` feature. Nothing persists past the process.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rankpulse_core::{
    ContextBundle, EventState, FailureReason, Insight, RankingEvent, SeriesKey, Severity, Snapshot,
};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::store::{PipelineStore, SnapshotPair};

#[derive(Debug, Default)]
struct Inner {
    snapshots: Vec<Snapshot>,
    events: BTreeMap<Uuid, RankingEvent>,
    bundles: BTreeMap<Uuid, ContextBundle>,
    /// Every insight ever stored, with its `is_current` flag.
    insights: Vec<(Insight, bool)>,
}

/// In-process [`PipelineStore`] with the same guarantees as the Postgres one:
/// duplicate snapshots and events are ignored, transitions are compare-and-set
/// on state and version, and stored `Ok` source results are never replaced.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test thread panicked mid-write.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Returns `false` for a duplicate `(entity, category, observed_at)`.
    pub fn add_snapshot(&self, snapshot: Snapshot) -> bool {
        let mut inner = self.lock();
        let duplicate = inner.snapshots.iter().any(|s| {
            s.series_key() == snapshot.series_key() && s.observed_at == snapshot.observed_at
        });
        if !duplicate {
            inner.snapshots.push(snapshot);
        }
        !duplicate
    }

    #[must_use]
    pub fn events(&self) -> Vec<RankingEvent> {
        self.lock().events.values().cloned().collect()
    }

    #[must_use]
    pub fn insights_for(&self, event_id: Uuid) -> Vec<Insight> {
        self.lock()
            .insights
            .iter()
            .filter(|(i, _)| i.event_id == event_id)
            .map(|(i, _)| i.clone())
            .collect()
    }

    /// Overwrites an event as if another worker had written it.
    pub fn put_event(&self, event: RankingEvent) {
        self.lock().events.insert(event.id, event);
    }

    fn update<F>(
        &self,
        id: Uuid,
        expected_state: EventState,
        expected_version: i64,
        apply: F,
    ) -> Result<RankingEvent, PipelineError>
    where
        F: FnOnce(&mut RankingEvent),
    {
        let mut inner = self.lock();
        let event = inner
            .events
            .get_mut(&id)
            .filter(|e| e.state == expected_state && e.version == expected_version)
            .ok_or(PipelineError::Stale { id })?;
        apply(event);
        event.version += 1;
        event.state_changed_at = Utc::now();
        Ok(event.clone())
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn list_tracked_series(&self) -> Result<Vec<SeriesKey>, PipelineError> {
        let keys: BTreeSet<SeriesKey> = self
            .lock()
            .snapshots
            .iter()
            .map(Snapshot::series_key)
            .collect();
        Ok(keys.into_iter().collect())
    }

    async fn latest_snapshot_pair(
        &self,
        key: &SeriesKey,
    ) -> Result<Option<SnapshotPair>, PipelineError> {
        let inner = self.lock();
        let mut series: Vec<&Snapshot> = inner
            .snapshots
            .iter()
            .filter(|s| &s.series_key() == key)
            .collect();
        series.sort_by_key(|s| std::cmp::Reverse(s.observed_at));
        let mut newest = series.into_iter().cloned();
        let Some(curr) = newest.next() else {
            return Ok(None);
        };
        Ok(Some((newest.next(), curr)))
    }

    async fn insert_event_if_absent(&self, event: &RankingEvent) -> Result<bool, PipelineError> {
        let mut inner = self.lock();
        let exists = inner
            .events
            .values()
            .any(|e| e.id == event.id || e.identity_key() == event.identity_key());
        if !exists {
            inner.events.insert(event.id, event.clone());
        }
        Ok(!exists)
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<RankingEvent>, PipelineError> {
        Ok(self.lock().events.get(&id).cloned())
    }

    async fn list_detected_events(
        &self,
        min_severity: Severity,
        limit: i64,
    ) -> Result<Vec<RankingEvent>, PipelineError> {
        let mut found: Vec<RankingEvent> = self
            .lock()
            .events
            .values()
            .filter(|e| e.state == EventState::Detected && e.severity >= min_severity)
            .cloned()
            .collect();
        found.sort_by_key(|e| (e.detected_at, e.id));
        found.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(found)
    }

    async fn list_stale_events(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RankingEvent>, PipelineError> {
        let mut found: Vec<RankingEvent> = self
            .lock()
            .events
            .values()
            .filter(|e| e.state.is_in_flight() && e.state_changed_at < older_than)
            .cloned()
            .collect();
        found.sort_by_key(|e| (e.state_changed_at, e.id));
        found.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(found)
    }

    async fn transition(
        &self,
        id: Uuid,
        expected_state: EventState,
        expected_version: i64,
        next: EventState,
    ) -> Result<RankingEvent, PipelineError> {
        expected_state.check_transition(next)?;
        self.update(id, expected_state, expected_version, |e| e.state = next)
    }

    async fn fail(
        &self,
        id: Uuid,
        expected_state: EventState,
        expected_version: i64,
        reason: &FailureReason,
    ) -> Result<RankingEvent, PipelineError> {
        expected_state.check_transition(EventState::Failed)?;
        self.update(id, expected_state, expected_version, |e| {
            e.state = EventState::Failed;
            e.failure = Some(reason.clone());
        })
    }

    async fn reclaim(
        &self,
        id: Uuid,
        expected_state: EventState,
        expected_version: i64,
    ) -> Result<RankingEvent, PipelineError> {
        self.update(id, expected_state, expected_version, |_| {})
    }

    async fn requeue_failed(&self, id: Uuid) -> Result<RankingEvent, PipelineError> {
        let version = match self.lock().events.get(&id) {
            None => return Err(PipelineError::NotFound),
            Some(e) => e.version,
        };
        self.update(id, EventState::Failed, version, |e| {
            e.state = EventState::Detected;
            e.failure = None;
        })
    }

    async fn get_bundle(&self, event_id: Uuid) -> Result<Option<ContextBundle>, PipelineError> {
        Ok(self.lock().bundles.get(&event_id).cloned())
    }

    async fn save_bundle(
        &self,
        bundle: &ContextBundle,
        configured: &[String],
    ) -> Result<ContextBundle, PipelineError> {
        let mut inner = self.lock();
        let stored = inner
            .bundles
            .entry(bundle.event_id)
            .or_insert_with(|| ContextBundle::empty(bundle.event_id, bundle.collected_at));
        stored.merge(bundle, configured);
        Ok(stored.clone())
    }

    async fn get_current_insight(
        &self,
        event_id: Uuid,
    ) -> Result<Option<Insight>, PipelineError> {
        Ok(self
            .lock()
            .insights
            .iter()
            .find(|(i, current)| *current && i.event_id == event_id)
            .map(|(i, _)| i.clone()))
    }

    async fn insert_insight(&self, insight: &Insight) -> Result<(), PipelineError> {
        let mut inner = self.lock();
        for (existing, current) in &mut inner.insights {
            if existing.event_id == insight.event_id {
                *current = false;
            }
        }
        inner.insights.push((insight.clone(), true));
        Ok(())
    }

    async fn similar_candidates(
        &self,
        event: &RankingEvent,
        limit: i64,
    ) -> Result<Vec<(RankingEvent, Option<String>)>, PipelineError> {
        let inner = self.lock();
        let mut found: Vec<&RankingEvent> = inner
            .events
            .values()
            .filter(|e| {
                e.state == EventState::InsightGenerated
                    && e.id != event.id
                    && (e.event_type == event.event_type || e.category_id == event.category_id)
            })
            .collect();
        found.sort_by_key(|e| (std::cmp::Reverse(e.detected_at), e.id));
        found.truncate(usize::try_from(limit).unwrap_or(0));

        Ok(found
            .into_iter()
            .map(|e| {
                let summary = inner
                    .insights
                    .iter()
                    .find(|(i, current)| *current && i.event_id == e.id)
                    .map(|(i, _)| i.summary.clone());
                (e.clone(), summary)
            })
            .collect())
    }
}
