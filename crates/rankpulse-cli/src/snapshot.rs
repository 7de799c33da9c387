//! Snapshot ingestion from the command line.

use rankpulse_core::Snapshot;

pub(crate) fn validate_snapshot(snapshot: &Snapshot) -> anyhow::Result<()> {
    if snapshot.entity_id.trim().is_empty() || snapshot.category_id.trim().is_empty() {
        anyhow::bail!("--entity and --category must not be empty");
    }
    if snapshot.rank <= 0 {
        anyhow::bail!("--rank must be positive, got {}", snapshot.rank);
    }
    if snapshot.review_count.is_some_and(|n| n < 0) {
        anyhow::bail!("--reviews must not be negative");
    }
    Ok(())
}

/// Appends one snapshot; a repeat of an existing `(series, observed_at)` is
/// reported and ignored.
///
/// # Errors
///
/// Returns an error if validation or the insert fails.
pub(crate) async fn run_snapshot_put(pool: &sqlx::PgPool, snapshot: &Snapshot) -> anyhow::Result<()> {
    validate_snapshot(snapshot)?;

    if rankpulse_db::insert_snapshot(pool, snapshot).await? {
        println!(
            "recorded {} rank {} at {}",
            snapshot.series_key(),
            snapshot.rank,
            snapshot.observed_at.to_rfc3339()
        );
    } else {
        println!(
            "snapshot for {} at {} already recorded; skipped",
            snapshot.series_key(),
            snapshot.observed_at.to_rfc3339()
        );
    }
    Ok(())
}
