use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use common::jobs::ImportJobState;
use thiserror::Error;

/// Rejections raised by the import job registry.
///
/// None of these leave a partially applied change behind: the job is exactly
/// as it was before the rejected call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImportJobError {
    #[error("import job {0} not found")]
    NotFound(String),

    #[error("import job {job_id} cannot {operation} while {state}")]
    IllegalState {
        job_id: String,
        operation: &'static str,
        state: ImportJobState,
    },

    #[error("invalid update for import job {job_id}: {reason}")]
    Validation { job_id: String, reason: String },
}

/// Unrecoverable failures of the import worker. Any of these fails the job.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("unsupported file type: {0}")]
    UnsupportedFile(String),

    #[error(transparent)]
    Job(#[from] ImportJobError),
}

/// Errors surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).body(self.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(format!("failed to store upload: {}", err))
    }
}
