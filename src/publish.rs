//! Uploading generated artifacts and handing out access URLs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::storage::{ObjectStorage, StorageError, UploadOptions};

pub const ARTIFACT_ROOT: &str = "generated_documents";
pub const DEFAULT_URL_TTL: Duration = Duration::from_secs(60 * 60);
const CACHE_CONTROL: &str = "public, max-age=3600";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Pdf,
    Docx,
}

impl ArtifactKind {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Docx => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid artifact path component {0:?}")]
    InvalidPathComponent(String),
    #[error("failed to upload artifact: {0}")]
    Upload(#[source] StorageError),
    #[error("no safe access URL for {path}: {reason}")]
    UrlGeneration { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifact {
    pub path: String,
    pub url: String,
}

/// How access URLs are minted when an object is not already public.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    pub ttl: Duration,
    pub allowed_origins: Vec<String>,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_URL_TTL,
            allowed_origins: Vec::new(),
        }
    }
}

/// True when `component` can stand alone as one segment of an object path.
pub fn is_path_component(component: &str) -> bool {
    !(component.is_empty()
        || component == "."
        || component == ".."
        || component.contains('/')
        || component.contains('\\'))
}

/// `generated_documents/{office_id}/{job_id}/{file_name}`.
pub fn canonical_path(office_id: &str, job_id: &str, file_name: &str) -> Result<String, PublishError> {
    for component in [office_id, job_id, file_name] {
        if !is_path_component(component) {
            return Err(PublishError::InvalidPathComponent(component.to_string()));
        }
    }
    Ok(format!("{ARTIFACT_ROOT}/{office_id}/{job_id}/{file_name}"))
}

#[derive(Clone)]
pub struct ArtifactPublisher {
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    policy: UrlPolicy,
}

impl ArtifactPublisher {
    pub fn new(storage: Arc<dyn ObjectStorage>, bucket: impl Into<String>, policy: UrlPolicy) -> Self {
        Self {
            storage,
            bucket: bucket.into(),
            policy,
        }
    }

    /// Uploads `file` under its canonical path and returns that path with an access URL.
    ///
    /// Publishing the same job again overwrites the same object.
    pub async fn publish(
        &self,
        job_id: &str,
        office_id: &str,
        file: &Path,
        kind: ArtifactKind,
    ) -> Result<PublishedArtifact, PublishError> {
        let file_name = file
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| PublishError::InvalidPathComponent(String::new()))?;
        let path = canonical_path(office_id, job_id, file_name)?;

        let options = UploadOptions {
            content_type: kind.content_type().to_string(),
            content_disposition: Some(format!(
                "attachment; filename=\"{}\"",
                sanitize_filename::sanitize(file_name)
            )),
            cache_control: Some(CACHE_CONTROL.to_string()),
        };

        self.storage
            .upload(&self.bucket, &path, file, &options)
            .await
            .map_err(PublishError::Upload)?;

        let url = self.access_url(&path).await?;
        Ok(PublishedArtifact { path, url })
    }

    /// Public URL if the object already is public, else a signed URL, else make
    /// the object public where per-object ACLs exist. A uniform-access bucket
    /// without a signing credential has no safe option left.
    async fn access_url(&self, path: &str) -> Result<String, PublishError> {
        match self.storage.is_public(&self.bucket, path).await {
            Ok(true) => return Ok(self.storage.public_url(&self.bucket, path)),
            Ok(false) => {}
            Err(e) => log::warn!("Could not determine visibility of {}: {}", path, e),
        }

        let mut reasons = Vec::new();

        if self.storage.can_sign() {
            match self
                .storage
                .sign_url(&self.bucket, path, self.policy.ttl, &self.policy.allowed_origins)
                .await
            {
                Ok(url) => return Ok(url),
                Err(e) => {
                    log::warn!("Signing URL for {} failed: {}", path, e);
                    reasons.push(format!("signing failed: {e}"));
                }
            }
        } else {
            reasons.push("no signing credential configured".to_string());
        }

        match self.storage.uniform_access(&self.bucket).await {
            Ok(false) => match self.storage.make_public(&self.bucket, path).await {
                Ok(()) => {
                    log::info!("Made {} public", path);
                    return Ok(self.storage.public_url(&self.bucket, path));
                }
                Err(e) => {
                    log::warn!("Making {} public failed: {}", path, e);
                    reasons.push(format!("making object public failed: {e}"));
                }
            },
            Ok(true) => reasons.push("bucket enforces uniform access".to_string()),
            Err(e) => reasons.push(format!("bucket access mode unknown: {e}")),
        }

        Err(PublishError::UrlGeneration {
            path: path.to_string(),
            reason: reasons.join("; "),
        })
    }
}
