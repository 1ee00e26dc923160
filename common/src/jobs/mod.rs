//! Wire types for the bulk board import job.
//!
//! These are the shapes returned by the backend when an import is started
//! (`ImportJobStartResponse`) and when a client polls for its progress
//! (`ImportJobStatusResponse`). Field names serialize as camelCase so the
//! browser client can consume them unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of an import job.
///
/// A job only ever moves forward: `Pending -> InProgress -> Completed | Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportJobState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ImportJobState {
    /// `Completed` and `Failed` accept no further mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, ImportJobState::Completed | ImportJobState::Failed)
    }
}

impl fmt::Display for ImportJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportJobState::Pending => "PENDING",
            ImportJobState::InProgress => "IN_PROGRESS",
            ImportJobState::Completed => "COMPLETED",
            ImportJobState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// How imported rows are reconciled with the board's existing content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportMode {
    /// Upsert cards into the existing columns, leaving other cards alone.
    #[default]
    Merge,
    /// Archive the existing cards of every column the import touches.
    Overwrite,
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportMode::Merge => f.write_str("MERGE"),
            ImportMode::Overwrite => f.write_str("OVERWRITE"),
        }
    }
}

/// Returned when a request names an import mode outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownImportMode(pub String);

impl fmt::Display for UnknownImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown import mode '{}'", self.0)
    }
}

impl std::error::Error for UnknownImportMode {}

impl FromStr for ImportMode {
    type Err = UnknownImportMode;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "merge" => Ok(ImportMode::Merge),
            "overwrite" | "replace" => Ok(ImportMode::Overwrite),
            _ => Err(UnknownImportMode(value.to_string())),
        }
    }
}

/// A single spreadsheet row that could not be imported.
///
/// `row_index` is the 1-based row number as shown by spreadsheet software,
/// so the header is row 1 and the first data row is row 2.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRowError {
    #[serde(rename = "rowNumber")]
    pub row_index: u32,
    #[serde(rename = "message")]
    pub reason: String,
}

impl ImportRowError {
    pub fn new(row_index: u32, reason: impl Into<String>) -> Self {
        Self {
            row_index,
            reason: reason.into(),
        }
    }
}

/// Body of the `202 Accepted` response to an import upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobStartResponse {
    pub job_id: String,
    pub state: ImportJobState,
    pub mode: ImportMode,
    pub filename: Option<String>,
}

/// Point-in-time view of an import job, as served to polling clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobStatusResponse {
    pub job_id: String,
    pub workspace_id: i64,
    pub board_id: i64,
    pub mode: ImportMode,
    pub state: ImportJobState,
    pub total_rows: u32,
    pub processed_rows: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub progress_percent: u32,
    pub errors: Vec<ImportRowError>,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Percentage of rows processed, capped at 100.
///
/// A job whose workbook turned out to be empty reports 100 once completed.
pub fn progress_percent(state: ImportJobState, processed_rows: u32, total_rows: u32) -> u32 {
    if total_rows == 0 {
        return if state == ImportJobState::Completed { 100 } else { 0 };
    }
    let percent = u64::from(processed_rows) * 100 / u64::from(total_rows);
    percent.min(100) as u32
}
