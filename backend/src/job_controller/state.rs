//! Background tasks that observe the import job registry.
//!
//! - `JobUpdate`: the message broadcast by `ImportJobManager` whenever a job
//!   changes state or reports progress.
//! - `start_job_logger`: a long-running task that listens for `JobUpdate`
//!   messages and writes lifecycle transitions to the log.
//! - `start_retention_sweeper`: a long-running task that periodically evicts
//!   finished jobs once their retention window has passed.
//!
//! Both tasks are spawned from `main.rs`.

use super::manager::ImportJobManager;
use super::status::ImportJobStatus;
use chrono::Utc;
use common::jobs::ImportJobState;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

/// A snapshot of a job taken right after it changed.
#[derive(Clone, Debug)]
pub struct JobUpdate {
    /// The unique identifier of the job being updated.
    pub job_id: String,
    /// The job as it was immediately after the change.
    pub status: ImportJobStatus,
}

/// Logs each update received on `rx` until the registry is dropped.
///
/// A lagging receiver skips the missed updates and carries on.
pub async fn start_job_logger(mut rx: broadcast::Receiver<JobUpdate>) {
    loop {
        match rx.recv().await {
            Ok(update) => log_update(&update),
            Err(RecvError::Lagged(skipped)) => {
                warn!("import job logger skipped {} updates", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_update(update: &JobUpdate) {
    let status = &update.status;
    match status.state {
        ImportJobState::Pending => info!(
            "import job {} queued for board {} ({} mode)",
            update.job_id, status.board_id, status.mode
        ),
        ImportJobState::InProgress => debug!(
            "import job {}: {}/{} rows ({} ok, {} failed)",
            update.job_id,
            status.processed_rows,
            status.total_rows,
            status.success_count,
            status.failure_count
        ),
        ImportJobState::Completed => info!(
            "import job {} completed: {} ok, {} failed",
            update.job_id, status.success_count, status.failure_count
        ),
        ImportJobState::Failed => warn!(
            "import job {} failed: {}",
            update.job_id,
            status.message.as_deref().unwrap_or("")
        ),
    }
}

/// Evicts expired jobs from `manager` every `interval`.
pub async fn start_retention_sweeper(
    manager: ImportJobManager,
    retention: Duration,
    interval: Duration,
) {
    let retention = match chrono::Duration::from_std(retention) {
        Ok(retention) => retention,
        Err(e) => {
            warn!("import job retention out of range, eviction disabled: {}", e);
            return;
        }
    };
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let evicted = manager.purge_expired(retention, Utc::now());
        if evicted > 0 {
            info!("evicted {} finished import jobs", evicted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::jobs::ImportMode;

    #[tokio::test]
    async fn logger_stops_when_registry_is_dropped() {
        let manager = ImportJobManager::new();
        let logger = tokio::spawn(start_job_logger(manager.subscribe()));

        let job = manager.create_job(1, 2, ImportMode::Merge, None);
        manager.mark_in_progress(&job.job_id, 0).unwrap();
        manager.mark_completed(&job.job_id, "done").unwrap();
        drop(manager);

        tokio::time::timeout(Duration::from_secs(5), logger)
            .await
            .expect("logger should exit once the sender is gone")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_finished_jobs() {
        let manager = ImportJobManager::new();
        let job = manager.create_job(1, 2, ImportMode::Overwrite, None);
        manager.mark_in_progress(&job.job_id, 0).unwrap();
        manager.mark_failed(&job.job_id, "unreadable").unwrap();

        let sweeper = tokio::spawn(start_retention_sweeper(
            manager.clone(),
            Duration::ZERO,
            Duration::from_secs(60),
        ));
        tokio::time::sleep(Duration::from_secs(61)).await;
        sweeper.abort();

        assert!(manager.get_job(&job.job_id).is_none());
    }
}
