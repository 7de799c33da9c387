//! Cron trigger for pipeline runs.
//!
//! A run that is still going when the next tick fires makes that tick a
//! no-op, so runs never overlap within one process.

use std::sync::Arc;

use rankpulse_pipeline::PipelineCoordinator;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tokio_util::sync::CancellationToken;

/// Builds and starts the scheduler with the pipeline job registered.
///
/// The returned handle must be kept alive; dropping it stops the jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if `cron` is invalid or the scheduler fails
/// to start.
pub async fn build_scheduler(
    coordinator: Arc<PipelineCoordinator>,
    cron: &str,
    cancel: CancellationToken,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    register_pipeline_job(&scheduler, coordinator, cron, cancel).await?;
    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_pipeline_job(
    scheduler: &JobScheduler,
    coordinator: Arc<PipelineCoordinator>,
    cron: &str,
    cancel: CancellationToken,
) -> Result<(), JobSchedulerError> {
    let running = Arc::new(Mutex::new(()));

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let coordinator = Arc::clone(&coordinator);
        let cancel = cancel.clone();
        let running = Arc::clone(&running);

        Box::pin(async move {
            let Ok(_guard) = running.try_lock_owned() else {
                tracing::warn!("scheduler: previous pipeline run still in progress; skipping tick");
                return;
            };
            if cancel.is_cancelled() {
                return;
            }
            tracing::info!("scheduler: starting pipeline run");
            run_pipeline_job(&coordinator, &cancel).await;
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron = %cron, "scheduler: registered pipeline job");
    Ok(())
}

async fn run_pipeline_job(coordinator: &PipelineCoordinator, cancel: &CancellationToken) {
    match coordinator.run_once(cancel).await {
        Ok(summary) => tracing::info!(
            detected = summary.detected,
            generated = summary.generated,
            failed = summary.failed,
            errors = summary.errors,
            "scheduler: pipeline run complete"
        ),
        Err(e) => tracing::error!(error = %e, "scheduler: pipeline run failed"),
    }
}
