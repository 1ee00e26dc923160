//! # Board Import Worker
//!
//! Runs one bulk import from an uploaded sheet and reports its progress to the
//! `ImportJobManager`.
//!
//! ## Workflow:
//!
//! 1.  **Job Scheduling**: `schedule_import_job` registers a `PENDING` job,
//!     spawns a Tokio task for it and returns the job immediately so the
//!     upload handler can answer with the job id.
//!
//! 2.  **Background Processing**: The spawned task runs `run_import` through
//!     `tokio::task::spawn_blocking`, keeping file parsing and SQLite writes
//!     off the async runtime.
//!
//! 3.  **Sizing**: The sheet is read into rows and the job is moved to
//!     `IN_PROGRESS` with the row count. In `OVERWRITE` mode every live card
//!     of the board is archived next, in a transaction of its own.
//!
//! 4.  **Chunked Persistence**: Rows are written in chunks, one SQLite
//!     transaction per chunk. A row that cannot be imported is recorded with
//!     `append_error` and counted as a failure; the job carries on. After
//!     each chunk the running totals are reported with `update_progress`.
//!
//! 5.  **Completion**: The job is marked `COMPLETED`, or `FAILED` when the
//!     file cannot be read, the database rejects a write or the task panics.
//!     The uploaded file is removed in every case.
//!
//! The worker is the only writer of its job; it never holds a registry lock
//! while doing I/O.

use super::rows::{read_rows, ImportRow};
use super::store::{self, BoardStore, CardFields};
use crate::error::{ImportError, ImportJobError};
use crate::job_controller::manager::ImportJobManager;
use crate::job_controller::status::ImportJobStatus;
use common::jobs::{ImportJobState, ImportMode, ImportRowError};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;

/// Everything the worker needs to know about one upload.
#[derive(Clone, Debug)]
pub struct ImportTask {
    pub workspace_id: i64,
    pub board_id: i64,
    pub mode: ImportMode,
    /// Name the client gave the file.
    pub filename: Option<String>,
    /// Where the upload was stored. Deleted once the import ends.
    pub path: PathBuf,
}

/// What happened to a single row.
#[derive(Debug, PartialEq)]
enum RowOutcome {
    Imported,
    Rejected(String),
}

/// Final counters of a finished import.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
}

/// Registers the job and starts the import in the background.
///
/// Must be called from within a Tokio runtime. Returns the freshly created
/// `PENDING` job.
pub fn schedule_import_job(
    manager: ImportJobManager,
    store: BoardStore,
    task: ImportTask,
    chunk_size: usize,
) -> ImportJobStatus {
    let job = manager.create_job(task.workspace_id, task.board_id, task.mode, task.filename.clone());
    let job_id = job.job_id.clone();
    let upload = task.path.clone();

    let manager_for_blocking = manager.clone();
    let job_id_for_blocking = job_id.clone();
    let handle = tokio::task::spawn_blocking(move || {
        run_import(&manager_for_blocking, &store, &job_id_for_blocking, &task, chunk_size)
    });
    tokio::spawn(supervise_import(manager, job_id, upload, handle));

    job
}

/// Waits for the blocking import. If it panicked or was cancelled, the job
/// is failed and the upload removed, since `run_import` never got to it.
async fn supervise_import(
    manager: ImportJobManager,
    job_id: String,
    upload: PathBuf,
    handle: JoinHandle<()>,
) {
    if let Err(join_err) = handle.await {
        error!("import job {} aborted: {}", job_id, join_err);
        fail_job(&manager, &job_id, format!("import aborted: {}", join_err));
        remove_upload(&upload);
    }
}

/// Runs the import to completion or failure and cleans up the upload.
pub fn run_import(
    manager: &ImportJobManager,
    store: &BoardStore,
    job_id: &str,
    task: &ImportTask,
    chunk_size: usize,
) {
    info!(
        "import job {} started for board {} from {}",
        job_id,
        task.board_id,
        task.filename.as_deref().unwrap_or("<unnamed>")
    );

    match import_rows(manager, store, job_id, task, chunk_size) {
        Ok(summary) => info!(
            "import job {} finished: {} rows, {} imported, {} failed",
            job_id, summary.processed, summary.succeeded, summary.failed
        ),
        Err(e) => {
            error!("import job {} failed: {}", job_id, e);
            fail_job(manager, job_id, format!("import failed: {}", e));
        }
    }

    remove_upload(&task.path);
}

fn remove_upload(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("failed to delete upload {}: {}", path.display(), e);
    }
}

fn import_rows(
    manager: &ImportJobManager,
    store: &BoardStore,
    job_id: &str,
    task: &ImportTask,
    chunk_size: usize,
) -> Result<ImportSummary, ImportError> {
    let rows = read_rows(&task.path)?;
    let total = u32::try_from(rows.len())
        .map_err(|_| ImportError::UnsupportedFile("too many rows".to_string()))?;
    manager.mark_in_progress(job_id, total)?;

    let mut conn = store.connect()?;
    if task.mode == ImportMode::Overwrite {
        let tx = conn.transaction()?;
        let archived = store::archive_board_cards(&tx, task.board_id)?;
        tx.commit()?;
        info!("import job {} archived {} cards of board {}", job_id, archived, task.board_id);
    }

    let mut summary = ImportSummary::default();

    for chunk in rows.chunks(chunk_size.max(1)) {
        let tx = conn.transaction()?;
        let mut succeeded = 0;
        for row in chunk {
            match apply_row(&tx, task, row)? {
                RowOutcome::Imported => succeeded += 1,
                RowOutcome::Rejected(reason) => {
                    manager.append_error(job_id, ImportRowError::new(row.row_index, reason))?;
                }
            }
        }
        tx.commit()?;

        summary.processed += chunk.len() as u32;
        summary.succeeded += succeeded;
        summary.failed = summary.processed - summary.succeeded;
        manager.update_progress(job_id, summary.processed, summary.succeeded, summary.failed)?;
        debug!("import job {}: {}/{} rows", job_id, summary.processed, total);
    }

    manager.mark_completed(job_id, "import completed")?;
    Ok(summary)
}

/// Writes one row. `Err` means the database failed and the job must stop;
/// a row with bad content comes back as `RowOutcome::Rejected`.
fn apply_row(conn: &Connection, task: &ImportTask, row: &ImportRow) -> rusqlite::Result<RowOutcome> {
    if row.column_name.is_empty() {
        return Ok(RowOutcome::Rejected("column name is required".to_string()));
    }

    // A row with only column details just makes sure the column exists.
    if !row.has_card_payload() {
        store::resolve_column(conn, task.board_id, &row.column_name, row.column_position)?;
        return Ok(RowOutcome::Imported);
    }

    if row.card_title.is_empty() {
        return Ok(RowOutcome::Rejected("card title is required".to_string()));
    }

    let column_id = store::resolve_column(conn, task.board_id, &row.column_name, row.column_position)?;
    let card_id = store::upsert_card(
        conn,
        column_id,
        &CardFields {
            title: &row.card_title,
            description: &row.description,
            position: row.card_position,
            due_date: row.due_date,
            priority: &row.priority,
            assignee_email: &row.assignee_email,
        },
    )?;

    // An unknown parent leaves the card's current parent in place.
    if !row.parent_card_title.is_empty() {
        let parent = store::find_parent_card(
            conn,
            task.board_id,
            column_id,
            card_id,
            &row.parent_card_title,
        )?;
        if let Some(parent_id) = parent {
            store::set_parent_card(conn, card_id, parent_id)?;
        }
    }

    let label_ids = row
        .labels
        .iter()
        .map(|name| store::resolve_label(conn, task.board_id, name))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    store::set_card_labels(conn, card_id, &label_ids)?;
    store::replace_checklist(conn, card_id, &row.checklist_items, &row.checklist_states)?;

    Ok(RowOutcome::Imported)
}

/// Moves the job to `FAILED`, passing through `IN_PROGRESS` if the worker
/// never got far enough to start it.
fn fail_job(manager: &ImportJobManager, job_id: &str, message: String) {
    let started = match manager.get_job(job_id).map(|job| job.state) {
        Some(ImportJobState::Pending) => manager.mark_in_progress(job_id, 0),
        _ => Ok(()),
    };
    let result = started.and_then(|_| manager.mark_failed(job_id, message));
    if let Err(e) = result {
        match e {
            ImportJobError::IllegalState { .. } | ImportJobError::NotFound(_) => {
                warn!("could not mark import job {} as failed: {}", job_id, e)
            }
            ImportJobError::Validation { .. } => error!("{}", e),
        }
    }
}
