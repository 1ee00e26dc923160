//! The import job registry.
//!
//! `ImportJobManager` is the single source of truth for every bulk import
//! started since the process came up. It is created once in `main.rs`, cloned
//! into the Actix application data and into each import worker.
//!
//! Each job sits behind its own mutex, so progress on one import never
//! contends with another. The outer map lock is only held long enough to find
//! (or insert, or evict) a job slot; it is never held while a job is locked
//! except by the retention sweep, which always takes the map lock first.
//!
//! Every mutating operation validates the whole request before touching the
//! record, so a rejected call leaves the job exactly as it was.

use super::state::JobUpdate;
use super::status::ImportJobStatus;
use crate::error::ImportJobError;
use chrono::{DateTime, Duration, Utc};
use common::jobs::{ImportJobState, ImportMode, ImportRowError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Capacity of the status update channel. Slow subscribers lag rather than
/// slowing down the worker.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

type JobSlot = Arc<Mutex<ImportJobStatus>>;

#[derive(Clone)]
pub struct ImportJobManager {
    jobs: Arc<RwLock<HashMap<String, JobSlot>>>,
    updates: broadcast::Sender<JobUpdate>,
}

impl Default for ImportJobManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportJobManager {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            updates,
        }
    }

    /// Registers a new `PENDING` job and returns a copy of it.
    pub fn create_job(
        &self,
        workspace_id: i64,
        board_id: i64,
        mode: ImportMode,
        filename: Option<String>,
    ) -> ImportJobStatus {
        let job_id = Uuid::new_v4().to_string();
        let status = ImportJobStatus::pending(job_id.clone(), workspace_id, board_id, mode, filename);

        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, Arc::new(Mutex::new(status.clone())));
        if self.updates.receiver_count() > 0 {
            self.publish(status.clone());
        }
        status
    }

    /// Returns a snapshot of the job, or `None` if the id is unknown.
    pub fn get_job(&self, job_id: &str) -> Option<ImportJobStatus> {
        let slot = self.slot(job_id).ok()?;
        let status = lock(&slot).clone();
        Some(status)
    }

    /// `PENDING -> IN_PROGRESS`. Records the row count and the start time.
    pub fn mark_in_progress(&self, job_id: &str, total_rows: u32) -> Result<(), ImportJobError> {
        self.mutate(job_id, true, |status| {
            require_state(status, "start", ImportJobState::Pending)?;
            status.state = ImportJobState::InProgress;
            status.total_rows = total_rows;
            status.started_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Replaces the three counters with the caller's running totals.
    ///
    /// Rejected with `Validation` unless `success + failure == processed` and
    /// `processed <= total_rows`.
    pub fn update_progress(
        &self,
        job_id: &str,
        processed_rows: u32,
        success_count: u32,
        failure_count: u32,
    ) -> Result<(), ImportJobError> {
        self.mutate(job_id, true, |status| {
            require_state(status, "update progress", ImportJobState::InProgress)?;
            if u64::from(success_count) + u64::from(failure_count) != u64::from(processed_rows) {
                return Err(invalid(
                    status,
                    format!(
                        "success ({}) + failure ({}) must equal processed ({})",
                        success_count, failure_count, processed_rows
                    ),
                ));
            }
            if processed_rows > status.total_rows {
                return Err(invalid(
                    status,
                    format!(
                        "processed ({}) exceeds total rows ({})",
                        processed_rows, status.total_rows
                    ),
                ));
            }
            status.processed_rows = processed_rows;
            status.success_count = success_count;
            status.failure_count = failure_count;
            Ok(())
        })
    }

    /// Appends a row-level failure. Entries are never reordered or removed.
    pub fn append_error(&self, job_id: &str, error: ImportRowError) -> Result<(), ImportJobError> {
        self.mutate(job_id, false, |status| {
            require_state(status, "record a row error", ImportJobState::InProgress)?;
            if error.row_index == 0 {
                return Err(invalid(status, "row numbers start at 1".to_string()));
            }
            status.errors.push(error);
            Ok(())
        })
    }

    /// `IN_PROGRESS -> COMPLETED`.
    pub fn mark_completed(&self, job_id: &str, message: impl Into<String>) -> Result<(), ImportJobError> {
        self.finish(job_id, "complete", ImportJobState::Completed, message.into())
    }

    /// `IN_PROGRESS -> FAILED`. Used when the whole import is abandoned, not
    /// for individual bad rows.
    pub fn mark_failed(&self, job_id: &str, message: impl Into<String>) -> Result<(), ImportJobError> {
        self.finish(job_id, "fail", ImportJobState::Failed, message.into())
    }

    /// Subscribes to snapshots published on every state transition and
    /// progress update.
    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.updates.subscribe()
    }

    /// Evicts terminal jobs that finished at least `retention` before `now`.
    /// Jobs still pending or running are never evicted. Returns how many
    /// jobs were removed.
    pub fn purge_expired(&self, retention: Duration, now: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|_, slot| {
            let status = lock(slot);
            match status.finished_at {
                Some(finished_at) if status.state.is_terminal() => finished_at + retention > now,
                _ => true,
            }
        });
        before - jobs.len()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn finish(
        &self,
        job_id: &str,
        operation: &'static str,
        target: ImportJobState,
        message: String,
    ) -> Result<(), ImportJobError> {
        self.mutate(job_id, true, |status| {
            require_state(status, operation, ImportJobState::InProgress)?;
            let now = Utc::now();
            // The wall clock may step backwards between start and finish.
            let finished_at = match status.started_at {
                Some(started_at) if started_at > now => started_at,
                _ => now,
            };
            status.state = target;
            status.message = Some(message);
            status.finished_at = Some(finished_at);
            Ok(())
        })
    }

    fn slot(&self, job_id: &str) -> Result<JobSlot, ImportJobError> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
            .ok_or_else(|| ImportJobError::NotFound(job_id.to_string()))
    }

    /// Applies `apply` to the job under its lock. `apply` must check every
    /// precondition before writing any field.
    fn mutate<F>(&self, job_id: &str, publish: bool, apply: F) -> Result<(), ImportJobError>
    where
        F: FnOnce(&mut ImportJobStatus) -> Result<(), ImportJobError>,
    {
        let slot = self.slot(job_id)?;
        let mut status = lock(&slot);
        apply(&mut *status)?;
        if publish && self.updates.receiver_count() > 0 {
            let snapshot = status.clone();
            drop(status);
            self.publish(snapshot);
        }
        Ok(())
    }

    /// Sending only fails when every receiver is gone, which is not an error
    /// for the registry.
    fn publish(&self, status: ImportJobStatus) {
        let _ = self.updates.send(JobUpdate {
            job_id: status.job_id.clone(),
            status,
        });
    }
}

fn lock(slot: &JobSlot) -> MutexGuard<'_, ImportJobStatus> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn require_state(
    status: &ImportJobStatus,
    operation: &'static str,
    expected: ImportJobState,
) -> Result<(), ImportJobError> {
    if status.state == expected {
        Ok(())
    } else {
        Err(ImportJobError::IllegalState {
            job_id: status.job_id.clone(),
            operation,
            state: status.state,
        })
    }
}

fn invalid(status: &ImportJobStatus, reason: String) -> ImportJobError {
    ImportJobError::Validation {
        job_id: status.job_id.clone(),
        reason,
    }
}
