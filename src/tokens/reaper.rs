use std::sync::Arc;

use chrono::Duration;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use super::Clock;
use crate::database::{error::RepositoryError, queries::TokenRepository};

/// Deletes tokens that expired more than `retention` ago
pub async fn reap_expired(
    repo: &dyn TokenRepository,
    clock: &dyn Clock,
    retention: Duration,
) -> Result<u64, RepositoryError> {
    let cutoff = clock.now() - retention;
    let removed = repo.delete_expired_before(cutoff).await?;
    if removed > 0 {
        tracing::info!(removed, %cutoff, "Reaped expired unlock tokens");
    }
    Ok(removed)
}

/// Starts a scheduler running [`reap_expired`] on `schedule`.
///
/// The returned scheduler must be kept alive for the job to keep firing.
pub async fn start_reaper(
    schedule: &str,
    repo: Arc<dyn TokenRepository>,
    clock: Arc<dyn Clock>,
    retention: Duration,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async(schedule, move |_id, _scheduler| {
        let repo = Arc::clone(&repo);
        let clock = Arc::clone(&clock);
        Box::pin(async move {
            if let Err(e) = reap_expired(repo.as_ref(), clock.as_ref(), retention).await {
                tracing::error!("Token reaper failed: {e}");
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    tracing::info!("Token reaper scheduled: {schedule}");
    Ok(scheduler)
}
