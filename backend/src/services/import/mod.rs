//! Bulk board import from an uploaded spreadsheet.
//!
//! The provided routes are:
//! - `POST /api/v1/workspaces/{workspace_id}/boards/{board_id}/excel/import`:
//!   accepts a multipart upload with a `file` field and an optional `mode`
//!   query parameter (`merge` or `overwrite`). The file is stored in the
//!   upload directory, an import job is registered with the
//!   `ImportJobManager` and the worker is started in the background. Responds
//!   `202 Accepted` with the job id right away.
//!
//! - `GET /api/v1/import/{job_id}/status`: returns the current
//!   `ImportJobStatusResponse` of a job so the client can poll its progress,
//!   or `404` once the id is unknown (never issued, or evicted after
//!   finishing).

use actix_web::web::{get, post, scope};
use actix_web::Scope;

mod get_status;
pub mod rows;
mod start;
pub mod store;
pub mod worker;

const API_PATH: &str = "/api/v1";

/// Configures and returns the Actix scope for the import routes.
pub fn configure_routes() -> Scope {
    scope(API_PATH)
        // Upload a sheet and start importing it.
        .route(
            "/workspaces/{workspace_id}/boards/{board_id}/excel/import",
            post().to(start::process),
        )
        // Poll an import job.
        .route("/import/{job_id}/status", get().to(get_status::process))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::job_controller::manager::ImportJobManager;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, web, App};
    use common::jobs::{ImportJobStartResponse, ImportJobState, ImportJobStatusResponse, ImportMode};
    use std::time::Duration;
    use store::BoardStore;

    const BOUNDARY: &str = "----import-test-boundary";

    fn multipart_body(field: &str, filename: &str, content: &str) -> String {
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
             Content-Type: text/csv\r\n\r\n{content}\r\n--{b}--\r\n",
            b = BOUNDARY,
        )
    }

    fn upload_request(uri: &str, body: String) -> test::TestRequest {
        test::TestRequest::post()
            .uri(uri)
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    fn stored_uploads(config: &AppConfig) -> usize {
        std::fs::read_dir(&config.upload_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    fn config(dir: &tempfile::TempDir) -> AppConfig {
        AppConfig {
            upload_dir: dir.path().join("uploads"),
            database_path: dir.path().join("board.sqlite"),
            max_upload_bytes: 1024,
            ..AppConfig::default()
        }
    }

    #[actix_web::test]
    async fn upload_then_poll_until_completed() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let store = BoardStore::open(&config.database_path).unwrap();
        let manager = ImportJobManager::new();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(manager.clone()))
                .app_data(web::Data::new(store))
                .app_data(web::Data::new(config))
                .service(configure_routes()),
        )
        .await;

        let body = multipart_body(
            "file",
            "board.csv",
            "column name,card title\nTodo,First\n,Missing column\n",
        );
        let resp = test::call_service(
            &app,
            upload_request("/api/v1/workspaces/1/boards/2/excel/import?mode=OVERWRITE", body)
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let started: ImportJobStartResponse = test::read_body_json(resp).await;
        assert_eq!(started.mode, ImportMode::Overwrite);
        assert_eq!(started.filename.as_deref(), Some("board.csv"));

        let uri = format!("/api/v1/import/{}/status", started.job_id);
        let mut status: Option<ImportJobStatusResponse> = None;
        for _ in 0..200 {
            let req = test::TestRequest::get().uri(&uri).to_request();
            let current: ImportJobStatusResponse = test::call_and_read_body_json(&app, req).await;
            if current.state.is_terminal() {
                status = Some(current);
                break;
            }
            actix_web::rt::time::sleep(Duration::from_millis(10)).await;
        }

        let status = status.expect("import should finish");
        assert_eq!(status.state, ImportJobState::Completed);
        assert_eq!(status.workspace_id, 1);
        assert_eq!(status.board_id, 2);
        assert_eq!(status.total_rows, 2);
        assert_eq!(status.success_count, 1);
        assert_eq!(status.failure_count, 1);
        assert_eq!(status.progress_percent, 100);
        assert_eq!(status.errors[0].row_index, 3);
        assert!(status.finished_at.is_some());
    }

    #[actix_web::test]
    async fn rejects_bad_uploads_and_unknown_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let store = BoardStore::open(&config.database_path).unwrap();
        let manager = ImportJobManager::new();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(manager.clone()))
                .app_data(web::Data::new(store))
                .app_data(web::Data::new(config.clone()))
                .service(configure_routes()),
        )
        .await;
        let uri = "/api/v1/workspaces/1/boards/2/excel/import";

        let unknown_mode = upload_request(
            &format!("{}?mode=append", uri),
            multipart_body("file", "board.csv", "column name\nTodo\n"),
        );
        let resp = test::call_service(&app, unknown_mode.to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let missing_file = upload_request(uri, multipart_body("other", "board.csv", "x"));
        let resp = test::call_service(&app, missing_file.to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let oversized = upload_request(uri, multipart_body("file", "board.csv", &"x".repeat(2048)));
        let resp = test::call_service(&app, oversized.to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let empty = upload_request(uri, multipart_body("file", "board.csv", ""));
        let resp = test::call_service(&app, empty.to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // Rejected uploads leave nothing behind in the upload directory.
        assert_eq!(stored_uploads(&config), 0);
        assert_eq!(manager.job_count(), 0);

        let req = test::TestRequest::get()
            .uri("/api/v1/import/does-not-exist/status")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
