use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;

use super::{ObjectStorage, StorageError, UploadOptions};

const REDACTED: &str = "<redacted>";

#[derive(Clone)]
pub struct SupabaseConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    /// Service-role key. Required for signed URLs; without it objects can only
    /// be served from public buckets.
    pub service_role_key: Option<String>,
}

impl fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("supabase_url", &self.supabase_url)
            .field("supabase_anon_key", &REDACTED)
            .field(
                "service_role_key",
                &self.service_role_key.as_ref().map(|_| REDACTED),
            )
            .finish()
    }
}

/// Supabase Storage over its REST API.
pub struct SupabaseStorage {
    config: SupabaseConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct BucketInfo {
    #[serde(default)]
    public: bool,
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

impl SupabaseStorage {
    pub fn new(config: SupabaseConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn api_key(&self) -> &str {
        self.config
            .service_role_key
            .as_deref()
            .unwrap_or(&self.config.supabase_anon_key)
    }

    fn endpoint(&self, route: &[&str], bucket: &str, path: Option<&str>) -> Result<Url, StorageError> {
        let mut url = Url::parse(&self.config.supabase_url)
            .map_err(|e| StorageError::Connectivity(format!("invalid storage URL: {e}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StorageError::Connectivity("storage URL cannot be a base".into()))?;
            segments
                .pop_if_empty()
                .extend(["storage", "v1"])
                .extend(route)
                .push(bucket);
            if let Some(path) = path {
                segments.extend(path.split('/').filter(|s| !s.is_empty()));
            }
        }
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key()))
            .header("apikey", self.api_key())
    }
}

fn connectivity(err: reqwest::Error) -> StorageError {
    StorageError::Connectivity(err.without_url().to_string())
}

async fn check_status(response: reqwest::Response, object: &str) -> Result<reqwest::Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    log::warn!("Storage request for '{}' failed with {}: {}", object, status, message);
    Err(match status {
        StatusCode::NOT_FOUND => StorageError::NotFound(object.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            StorageError::PermissionDenied(object.to_string())
        }
        other => StorageError::Upstream {
            status: other.as_u16(),
            message: crate::truncate_chars(&message, 200),
        },
    })
}

#[async_trait]
impl ObjectStorage for SupabaseStorage {
    async fn download(&self, bucket: &str, path: &str, destination: &Path) -> Result<(), StorageError> {
        let url = self.endpoint(&["object"], bucket, Some(path))?;
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(connectivity)?;
        let bytes = check_status(response, path)
            .await?
            .bytes()
            .await
            .map_err(connectivity)?;
        tokio::fs::write(destination, &bytes).await?;
        log::info!("Downloaded {}/{} ({} bytes)", bucket, path, bytes.len());
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        source: &Path,
        options: &UploadOptions,
    ) -> Result<(), StorageError> {
        let data = tokio::fs::read(source).await?;
        let url = self.endpoint(&["object"], bucket, Some(path))?;

        let mut request = self
            .authorized(self.client.post(url))
            .header(header::CONTENT_TYPE, &options.content_type)
            .header("x-upsert", "true");
        if let Some(disposition) = &options.content_disposition {
            request = request.header(header::CONTENT_DISPOSITION, disposition);
        }
        if let Some(cache_control) = &options.cache_control {
            request = request.header(header::CACHE_CONTROL, cache_control);
        }

        let response = request.body(data).send().await.map_err(connectivity)?;
        check_status(response, path).await?;
        log::info!("Uploaded {}/{}", bucket, path);
        Ok(())
    }

    async fn is_public(&self, bucket: &str, _path: &str) -> Result<bool, StorageError> {
        let url = self.endpoint(&["bucket"], bucket, None)?;
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(connectivity)?;
        let info: BucketInfo = check_status(response, bucket)
            .await?
            .json()
            .await
            .map_err(connectivity)?;
        Ok(info.public)
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        match self.endpoint(&["object", "public"], bucket, Some(path)) {
            Ok(url) => url.to_string(),
            Err(_) => format!(
                "{}/storage/v1/object/public/{}/{}",
                self.config.supabase_url.trim_end_matches('/'),
                bucket,
                path
            ),
        }
    }

    fn can_sign(&self) -> bool {
        self.config.service_role_key.is_some()
    }

    async fn sign_url(
        &self,
        bucket: &str,
        path: &str,
        ttl: Duration,
        allowed_origins: &[String],
    ) -> Result<String, StorageError> {
        if !self.can_sign() {
            return Err(StorageError::PermissionDenied(
                "no signing credential configured".into(),
            ));
        }
        // Supabase signed URLs carry no origin binding; origins are enforced by
        // the project's CORS settings.
        log::debug!(
            "Signing {}/{} for {}s (origins: {})",
            bucket,
            path,
            ttl.as_secs(),
            allowed_origins.join(", ")
        );

        let url = self.endpoint(&["object", "sign"], bucket, Some(path))?;
        let response = self
            .authorized(self.client.post(url))
            .json(&json!({ "expiresIn": ttl.as_secs() }))
            .send()
            .await
            .map_err(connectivity)?;
        let signed: SignedUrlResponse = check_status(response, path)
            .await?
            .json()
            .await
            .map_err(connectivity)?;

        Ok(format!(
            "{}/storage/v1{}",
            self.config.supabase_url.trim_end_matches('/'),
            signed.signed_url
        ))
    }

    async fn uniform_access(&self, _bucket: &str) -> Result<bool, StorageError> {
        // Access is decided per bucket and by row-level policies, never per object.
        Ok(true)
    }

    async fn make_public(&self, _bucket: &str, _path: &str) -> Result<(), StorageError> {
        Err(StorageError::Unsupported("per-object ACL"))
    }
}
