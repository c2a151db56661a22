use actix_cors::Cors;
use actix_web::middleware::Compress;
use actix_web::{error, http::header, web, App, HttpResponse, HttpServer, Responder};
use actix_web_prometheus::PrometheusMetricsBuilder;
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

pub mod common;
pub mod config;
pub mod db;
pub mod document;
pub mod jobs;
pub mod models;
pub mod publish;
pub mod render;
pub mod storage;
pub mod templates;

pub use crate::common::truncate_chars;
pub use crate::db::AppState;

/// Upper bound on the diagnostic stored on a failed job or template.
pub const MAX_ERROR_CHARS: usize = 500;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error: error_type.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn not_found(message: &str) -> Self {
        Self::new("NotFound", message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new("BadRequest", message)
    }

    pub fn internal_error(message: &str) -> Self {
        Self::new("InternalServerError", message)
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::jobs::handlers::process_job,
        crate::templates::handlers::process_template,
        health
    ),
    components(
        schemas(
            jobs::handlers::JobRequest,
            jobs::handlers::JobSuccessResponse,
            jobs::handlers::JobFailureResponse,
            templates::handlers::TemplateProcessedResponse,
            models::PlaceholderConfig,
            ErrorResponse,
            HealthResponse,
        )
    ),
    tags(
        (name = "Document Jobs", description = "Job-created notifications that generate DOCX and PDF documents."),
        (name = "Templates", description = "Placeholder discovery for uploaded templates."),
        (name = "Health", description = "Liveness probe.")
    )
)]
pub struct ApiDoc;

/// Routes of the service, shared by the server and the HTTP tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default().error_handler(|err, _req| {
        let response = HttpResponse::BadRequest().json(ErrorResponse::bad_request(&err.to_string()));
        error::InternalError::from_response(err, response).into()
    });

    cfg.app_data(json_config)
        .service(web::resource("/").route(web::post().to(jobs::handlers::process_job)))
        .service(
            web::resource("/templates/{template_id}/process")
                .route(web::post().to(templates::handlers::process_template)),
        )
        .service(web::resource("/health").route(web::get().to(health)));
}

pub async fn run() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match config::AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let app_state = match AppState::new_with_config(&config).await {
        Ok(state) => web::Data::new(state),
        Err(e) => {
            log::error!("Failed to initialise the service. Please check SUPABASE_DATABASE_URL and the storage settings in .env. Error: {}", e);
            std::process::exit(1);
        }
    };

    let prometheus = PrometheusMetricsBuilder::new("docgen_server")
        .endpoint("/metrics")
        .build()
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    log::info!("Starting server at http://{}:{}", config.bind_addr, config.port);

    let allowed_origins = config.allowed_origins.clone();
    HttpServer::new(move || {
        let cors = allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
            .max_age(3600);

        App::new()
            .wrap(Compress::default())
            .wrap(prometheus.clone())
            .wrap(cors)
            .app_data(app_state.clone())
            .configure(configure)
            .service(SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-doc/openapi.json", ApiDoc::openapi()))
    })
    .keep_alive(actix_web::http::KeepAlive::Os)
    .bind((config.bind_addr.as_str(), config.port))?
    .run()
    .await
}
