//! Template ingestion: discovering the placeholders of an uploaded template
//! and storing the derived field schema on the template record.

pub mod handlers;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::db::{fetch_record, Collection, DocumentStore};
use crate::document;
use crate::jobs::{JobWorkspace, PipelineError, RecordKind};
use crate::models::{PlaceholderConfig, Template};
use crate::storage::{bucket_from_download_url, ObjectStorage};

/// Bucket and object path of a template's source file.
pub(crate) fn template_location(
    template: &Template,
    fallback_bucket: Option<&str>,
) -> Result<(String, String), PipelineError> {
    let path = template
        .storage_path
        .as_deref()
        .filter(|path| !path.trim().is_empty())
        .ok_or_else(|| PipelineError::validation(format!("template {} has no storagePath", template.id)))?;

    let bucket = template
        .download_url
        .as_deref()
        .and_then(bucket_from_download_url)
        .or_else(|| fallback_bucket.map(str::to_string))
        .ok_or_else(|| {
            PipelineError::validation(format!("cannot determine storage bucket of template {}", template.id))
        })?;

    Ok((bucket, path.to_string()))
}

pub struct TemplateIngestor {
    documents: Arc<dyn DocumentStore>,
    storage: Arc<dyn ObjectStorage>,
    fallback_bucket: Option<String>,
}

impl TemplateIngestor {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        storage: Arc<dyn ObjectStorage>,
        fallback_bucket: Option<String>,
    ) -> Self {
        Self {
            documents,
            storage,
            fallback_bucket,
        }
    }

    /// Scans the template's document and stores one schema entry per placeholder.
    ///
    /// The template ends up `processed` or `failed`; a failure is also returned.
    pub async fn ingest(
        &self,
        template_id: &str,
    ) -> Result<BTreeMap<String, PlaceholderConfig>, PipelineError> {
        let template = fetch_record::<Template>(self.documents.as_ref(), Collection::Templates, template_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(RecordKind::Template, template_id))?;

        match self.process(&template).await {
            Ok(placeholders) => Ok(placeholders),
            Err(e) => {
                log::error!("Processing template {} failed: {}", template_id, e);
                let patch = status_patch("failed", json!(e.diagnostic()));
                if let Err(write_err) = self
                    .documents
                    .update(Collection::Templates, template_id, patch)
                    .await
                {
                    log::warn!("Could not record failure of template {}: {}", template_id, write_err);
                }
                Err(e)
            }
        }
    }

    async fn process(
        &self,
        template: &Template,
    ) -> Result<BTreeMap<String, PlaceholderConfig>, PipelineError> {
        self.documents
            .update(Collection::Templates, &template.id, status_patch("processing", Value::Null))
            .await?;
        log::info!("Processing template {}", template.id);

        let (bucket, path) = template_location(template, self.fallback_bucket.as_deref())?;
        let workspace = JobWorkspace::create(&format!("template {}", template.id))
            .map_err(PipelineError::Workspace)?;
        let local = workspace.file("template.docx");

        let scanned = match self.storage.download(&bucket, &path, &local).await {
            Ok(()) => document::scan(&local).map_err(PipelineError::from),
            Err(e) => Err(PipelineError::from(e)),
        };
        workspace.close();
        let names = scanned?;

        let placeholders: BTreeMap<String, PlaceholderConfig> = names
            .iter()
            .map(|name| (name.clone(), PlaceholderConfig::discovered(name)))
            .collect();

        let mut patch = status_patch("processed", Value::Null);
        patch.insert("placeholders".into(), json!(placeholders));
        self.documents
            .update(Collection::Templates, &template.id, patch)
            .await?;
        log::info!(
            "Template {} processed with {} placeholders",
            template.id,
            placeholders.len()
        );
        Ok(placeholders)
    }
}

fn status_patch(status: &str, error: Value) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert("status".into(), json!(status));
    patch.insert("error".into(), error);
    patch.insert("updatedAt".into(), json!(chrono::Utc::now()));
    patch
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(storage_path: Option<&str>, download_url: Option<&str>) -> Template {
        serde_json::from_value(json!({
            "id": "t1",
            "storagePath": storage_path,
            "downloadURL": download_url,
        }))
        .unwrap()
    }

    #[test]
    fn location_uses_bucket_from_download_url() {
        let t = template(
            Some("templates/o1/contrato.docx"),
            Some("https://firebasestorage.googleapis.com/v0/b/my-bucket/o/templates%2Fo1%2Fcontrato.docx?alt=media"),
        );
        assert_eq!(
            template_location(&t, Some("fallback")).unwrap(),
            ("my-bucket".to_string(), "templates/o1/contrato.docx".to_string())
        );
    }

    #[test]
    fn location_falls_back_to_configured_bucket() {
        let t = template(Some("templates/contrato.docx"), None);
        assert_eq!(template_location(&t, Some("templates")).unwrap().0, "templates");
    }

    #[test]
    fn location_requires_path_and_bucket() {
        let missing_path = template(None, None);
        assert_eq!(
            template_location(&missing_path, Some("b")).unwrap_err().kind(),
            "ValidationError"
        );
        let missing_bucket = template(Some("a.docx"), None);
        assert_eq!(
            template_location(&missing_bucket, None).unwrap_err().kind(),
            "ValidationError"
        );
    }
}
