use chrono::Utc;
use rankpulse_core::{EventDetector, RankingEvent, SeriesKey};

use crate::error::PipelineError;
use crate::store::PipelineStore;

/// Runs the detector over the latest snapshot pair of one series and persists
/// any new events.
///
/// Returns only events that were not already stored, so running it twice on
/// unchanged snapshots yields nothing the second time.
///
/// # Errors
///
/// Returns [`PipelineError`] if the store cannot be read or written.
pub async fn detect_series(
    store: &dyn PipelineStore,
    detector: &EventDetector,
    key: &SeriesKey,
) -> Result<Vec<RankingEvent>, PipelineError> {
    let Some((prev, curr)) = store.latest_snapshot_pair(key).await? else {
        return Ok(Vec::new());
    };

    let mut inserted = Vec::new();
    for event in detector.detect(prev.as_ref(), &curr, Utc::now()) {
        if store.insert_event_if_absent(&event).await? {
            tracing::info!(
                event_id = %event.id,
                series = %key,
                event_type = %event.event_type,
                severity = %event.severity,
                magnitude_pct = event.magnitude_pct,
                "ranking event detected"
            );
            inserted.push(event);
        } else {
            tracing::debug!(event_id = %event.id, series = %key, "event already recorded");
        }
    }
    Ok(inserted)
}
