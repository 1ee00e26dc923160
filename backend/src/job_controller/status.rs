use chrono::{DateTime, Utc};
use common::jobs::{
    progress_percent, ImportJobState, ImportJobStatusResponse, ImportMode, ImportRowError,
};

/// The registry's record of one import job.
///
/// Values of this type handed out by `ImportJobManager` are owned copies:
/// changing one has no effect on the registry, and holding one never blocks
/// the worker.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportJobStatus {
    pub job_id: String,
    pub workspace_id: i64,
    pub board_id: i64,
    pub mode: ImportMode,
    /// Name of the uploaded file, kept for diagnostics only.
    pub filename: Option<String>,
    pub state: ImportJobState,
    /// Zero until the worker has sized the workbook.
    pub total_rows: u32,
    pub processed_rows: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub errors: Vec<ImportRowError>,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ImportJobStatus {
    pub(crate) fn pending(
        job_id: String,
        workspace_id: i64,
        board_id: i64,
        mode: ImportMode,
        filename: Option<String>,
    ) -> Self {
        Self {
            job_id,
            workspace_id,
            board_id,
            mode,
            filename,
            state: ImportJobState::Pending,
            total_rows: 0,
            processed_rows: 0,
            success_count: 0,
            failure_count: 0,
            errors: Vec::new(),
            message: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn progress_percent(&self) -> u32 {
        progress_percent(self.state, self.processed_rows, self.total_rows)
    }

    pub fn to_response(&self) -> ImportJobStatusResponse {
        ImportJobStatusResponse {
            job_id: self.job_id.clone(),
            workspace_id: self.workspace_id,
            board_id: self.board_id,
            mode: self.mode,
            state: self.state,
            total_rows: self.total_rows,
            processed_rows: self.processed_rows,
            success_count: self.success_count,
            failure_count: self.failure_count,
            progress_percent: self.progress_percent(),
            errors: self.errors.clone(),
            message: self.message.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}
