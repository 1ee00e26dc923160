use super::store::BoardStore;
use super::worker::{schedule_import_job, ImportTask};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::job_controller::manager::ImportJobManager;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use common::jobs::{ImportJobStartResponse, ImportMode, UnknownImportMode};
use common::requests::ImportRequest;
use futures_util::StreamExt;
use log::info;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// An upload written to disk, waiting for the worker.
struct StoredUpload {
    path: PathBuf,
    filename: Option<String>,
}

/// HTTP handler for the board import upload.
///
/// - On success: returns `202 Accepted` with an `ImportJobStartResponse`.
/// - On a bad request (unknown mode, missing, empty or oversized file):
///   returns `400 Bad Request` with the reason.
pub(crate) async fn process(
    path: web::Path<(i64, i64)>,
    query: web::Query<ImportRequest>,
    payload: Multipart,
    manager: web::Data<ImportJobManager>,
    store: web::Data<BoardStore>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let (workspace_id, board_id) = path.into_inner();
    let mode: ImportMode = query
        .mode
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|e: UnknownImportMode| ApiError::BadRequest(e.to_string()))?;

    let upload = save_upload(payload, &config.upload_dir, config.max_upload_bytes).await?;
    let task = ImportTask {
        workspace_id,
        board_id,
        mode,
        filename: upload.filename,
        path: upload.path,
    };

    let job = schedule_import_job(
        manager.get_ref().clone(),
        store.get_ref().clone(),
        task,
        config.chunk_size,
    );
    info!(
        "accepted import {} for workspace {} board {}",
        job.job_id, workspace_id, board_id
    );

    Ok(HttpResponse::Accepted().json(ImportJobStartResponse {
        job_id: job.job_id,
        state: job.state,
        mode: job.mode,
        filename: job.filename,
    }))
}

/// Streams the `file` field of the multipart payload into `upload_dir`.
///
/// Only the first `file` field is kept; other fields are ignored. Until the
/// upload is accepted it lives in a `NamedTempFile`, so any early return
/// removes what was written so far.
async fn save_upload(
    mut payload: Multipart,
    upload_dir: &Path,
    max_bytes: usize,
) -> Result<StoredUpload, ApiError> {
    let mut stored: Option<(NamedTempFile, Option<String>, usize)> = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| ApiError::BadRequest(format!("invalid upload: {}", e)))?;
        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_name().map(|n| n.to_string()));
        if name.as_deref() != Some("file") || stored.is_some() {
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .and_then(|f| Path::new(f).file_name())
            .and_then(|f| f.to_str())
            .map(|f| f.to_string());

        // The worker picks the reader from the extension, so the client's
        // file name is kept as the suffix.
        fs::create_dir_all(upload_dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&format!("-{}", filename.as_deref().unwrap_or("upload")))
            .tempfile_in(upload_dir)?;
        let mut written = 0usize;
        {
            let mut writer = BufWriter::new(file.as_file_mut());
            while let Some(chunk) = field.next().await {
                let chunk =
                    chunk.map_err(|e| ApiError::BadRequest(format!("invalid upload: {}", e)))?;
                written += chunk.len();
                if written > max_bytes {
                    return Err(ApiError::BadRequest(format!(
                        "file must not exceed {} bytes",
                        max_bytes
                    )));
                }
                writer.write_all(&chunk)?;
            }
            writer.flush()?;
        }
        stored = Some((file, filename, written));
    }

    match stored {
        Some((_, _, 0)) => Err(ApiError::BadRequest("uploaded file is empty".to_string())),
        Some((file, filename, _)) => {
            let path: PathBuf = file.into_temp_path().keep().map_err(|e| e.error)?;
            Ok(StoredUpload { path, filename })
        }
        None => Err(ApiError::BadRequest("no file uploaded".to_string())),
    }
}
