//! Database module - AppState and the document store
//!
//! Records (jobs, forms, templates) are schemaless JSON documents addressed by
//! collection and id. The pipeline reads whole records and writes partial
//! field merges, so the store only needs `get` and `update`.
//! - `postgres` - JSONB-backed implementation

mod postgres;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

pub use postgres::PgDocumentStore;

use crate::config::AppConfig;
use crate::jobs::{JobOrchestrator, PipelineSettings};
use crate::render::{LibreOfficeConverter, PdfConverter};
use crate::storage::{ObjectStorage, SupabaseStorage};
use crate::templates::TemplateIngestor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Jobs,
    Forms,
    Templates,
}

impl Collection {
    pub fn table(self) -> &'static str {
        match self {
            Self::Jobs => "document_jobs",
            Self::Forms => "forms",
            Self::Templates => "templates",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("query failed: {0}")]
    Database(String),
    #[error("{collection}/{id} does not exist")]
    Missing { collection: Collection, id: String },
    #[error("{collection}/{id} has an unexpected shape: {message}")]
    Decode {
        collection: Collection,
        id: String,
        message: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError>;

    /// Merges `fields` into the existing record; absent fields are left alone.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError>;
}

/// Loads a record and decodes it, filling in `id` from the key.
pub async fn fetch_record<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: Collection,
    id: &str,
) -> Result<Option<T>, StoreError> {
    let Some(mut record) = store.get(collection, id).await? else {
        return Ok(None);
    };
    if let Value::Object(fields) = &mut record {
        fields
            .entry("id")
            .or_insert_with(|| Value::String(id.to_string()));
    }
    serde_json::from_value(record)
        .map(Some)
        .map_err(|e| StoreError::Decode {
            collection,
            id: id.to_string(),
            message: e.to_string(),
        })
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<JobOrchestrator>,
    pub ingestor: Arc<TemplateIngestor>,
}

impl AppState {
    pub async fn new_with_config(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(900))
            .connect(&config.database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        let http_client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(900))
            .user_agent(concat!("docgen-server/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let documents: Arc<dyn DocumentStore> = Arc::new(PgDocumentStore::new(pool));
        let storage: Arc<dyn ObjectStorage> =
            Arc::new(SupabaseStorage::new(config.supabase.clone(), http_client));
        let converter: Arc<dyn PdfConverter> =
            Arc::new(LibreOfficeConverter::new(config.converter_bin.clone()));

        Ok(Self::from_parts(
            documents,
            storage,
            converter,
            config.pipeline_settings(),
        ))
    }

    pub fn from_parts(
        documents: Arc<dyn DocumentStore>,
        storage: Arc<dyn ObjectStorage>,
        converter: Arc<dyn PdfConverter>,
        settings: PipelineSettings,
    ) -> Self {
        let ingestor = TemplateIngestor::new(
            documents.clone(),
            storage.clone(),
            settings.template_bucket.clone(),
        );
        let orchestrator = JobOrchestrator::new(documents, storage, converter, settings);

        AppState {
            orchestrator: Arc::new(orchestrator),
            ingestor: Arc::new(ingestor),
        }
    }
}
