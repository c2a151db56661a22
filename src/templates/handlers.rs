use std::collections::BTreeMap;

use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::jobs::PipelineError;
use crate::models::PlaceholderConfig;
use crate::{AppState, ErrorResponse};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateProcessedResponse {
    pub status: String,
    pub template_id: String,
    pub placeholders: BTreeMap<String, PlaceholderConfig>,
}

#[utoipa::path(
    post,
    path = "/templates/{template_id}/process",
    tag = "Templates",
    params(
        ("template_id" = String, Path, description = "ID of the uploaded template")
    ),
    responses(
        (status = 200, description = "Placeholders discovered and stored", body = TemplateProcessedResponse),
        (status = 404, description = "Template not found", body = ErrorResponse),
        (status = 500, description = "Template could not be processed", body = ErrorResponse)
    )
)]
pub async fn process_template(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let template_id = path.into_inner();

    match state.ingestor.ingest(&template_id).await {
        Ok(placeholders) => HttpResponse::Ok().json(TemplateProcessedResponse {
            status: "processed".to_string(),
            template_id,
            placeholders,
        }),
        Err(e @ PipelineError::NotFound { .. }) => {
            HttpResponse::NotFound().json(ErrorResponse::not_found(&e.to_string()))
        }
        Err(e) => HttpResponse::InternalServerError().json(ErrorResponse::internal_error(&e.diagnostic())),
    }
}
