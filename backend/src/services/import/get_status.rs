use crate::error::ApiError;
use crate::job_controller::manager::ImportJobManager;
use actix_web::{web, HttpResponse};

pub(crate) async fn process(
    job_id: web::Path<String>,
    manager: web::Data<ImportJobManager>,
) -> Result<HttpResponse, ApiError> {
    let job_id = job_id.into_inner();
    match manager.get_job(&job_id) {
        Some(status) => Ok(HttpResponse::Ok().json(status.to_response())),
        None => Err(ApiError::NotFound(format!("import job {} not found", job_id))),
    }
}
