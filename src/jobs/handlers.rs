use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{AppState, ErrorResponse};

use super::JobEvent;

/// Body of a job-created notification. `jobId` is required; `formId` is
/// optional and falls back to the one stored on the job.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub job_id: Option<String>,
    pub form_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobSuccessResponse {
    pub status: String,
    #[serde(rename = "jobId")]
    pub job_id: String,
    #[serde(rename = "formId")]
    pub form_id: Option<String>,
    pub pdf_url: Option<String>,
    pub docx_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobFailureResponse {
    pub error: String,
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub details: String,
}

#[utoipa::path(
    post,
    path = "/",
    tag = "Document Jobs",
    request_body = JobRequest,
    responses(
        (status = 200, description = "Documents generated and attached to the form", body = JobSuccessResponse),
        (status = 400, description = "Request carries no jobId", body = ErrorResponse),
        (status = 500, description = "Job failed; the diagnostic was stored on the job", body = JobFailureResponse)
    )
)]
pub async fn process_job(
    state: web::Data<AppState>,
    body: web::Json<JobRequest>,
) -> impl Responder {
    let JobRequest { job_id, form_id } = body.into_inner();
    let Some(job_id) = job_id.filter(|id| !id.trim().is_empty()) else {
        log::warn!("Rejected job notification without jobId");
        return HttpResponse::BadRequest().json(ErrorResponse::bad_request("Missing jobId"));
    };

    match state.orchestrator.handle(JobEvent::new(job_id, form_id)).await {
        Ok(outcome) => {
            let artifacts = outcome.artifacts();
            HttpResponse::Ok().json(JobSuccessResponse {
                status: "success".to_string(),
                job_id: outcome.job_id().to_string(),
                form_id: outcome.form_id().map(str::to_string),
                pdf_url: artifacts.map(|a| a.pdf_url.clone()),
                docx_url: artifacts.map(|a| a.docx_url.clone()),
            })
        }
        Err(failure) => HttpResponse::InternalServerError().json(JobFailureResponse {
            error: "Document processing failed".to_string(),
            job_id: failure.job_id,
            details: failure.details,
        }),
    }
}
