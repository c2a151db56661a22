//! Object storage collaborator.
//!
//! The pipeline talks to blob storage only through [`ObjectStorage`] so tests
//! can swap in an in-memory store. [`SupabaseStorage`] is the production backend.

mod supabase;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use supabase::{SupabaseConfig, SupabaseStorage};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("access denied to storage: {0}")]
    PermissionDenied(String),
    #[error("storage unreachable: {0}")]
    Connectivity(String),
    #[error("storage returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("operation not supported by this storage backend: {0}")]
    Unsupported(&'static str),
    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Headers attached to an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub content_type: String,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Downloads `bucket/path` into the local file `destination`.
    async fn download(&self, bucket: &str, path: &str, destination: &Path) -> Result<(), StorageError>;

    /// Uploads the local file `source` to `bucket/path`, overwriting any existing object.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        source: &Path,
        options: &UploadOptions,
    ) -> Result<(), StorageError>;

    /// Whether the object can be fetched without credentials.
    async fn is_public(&self, bucket: &str, path: &str) -> Result<bool, StorageError>;

    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Whether a signing credential is configured.
    fn can_sign(&self) -> bool;

    /// Mints a time-limited GET URL for the object.
    async fn sign_url(
        &self,
        bucket: &str,
        path: &str,
        ttl: Duration,
        allowed_origins: &[String],
    ) -> Result<String, StorageError>;

    /// Whether the bucket enforces bucket-level access only (no per-object ACLs).
    async fn uniform_access(&self, bucket: &str) -> Result<bool, StorageError>;

    /// Grants anonymous read on a single object.
    async fn make_public(&self, bucket: &str, path: &str) -> Result<(), StorageError>;
}

/// Extracts the bucket name from a template download URL.
///
/// Understands Firebase (`/v0/b/{bucket}/o/...`), Supabase
/// (`/storage/v1/object/{public|sign|authenticated}/{bucket}/...`) and `gs://{bucket}/...`.
pub fn bucket_from_download_url(download_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(download_url).ok()?;
    if url.scheme() == "gs" {
        return url.host_str().map(str::to_string);
    }

    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    if let ["v0", "b", bucket, "o", ..] = segments.as_slice() {
        return Some(bucket.to_string());
    }

    let object = segments.iter().position(|s| *s == "object")?;
    match &segments[object + 1..] {
        ["public" | "sign" | "authenticated", bucket, _, ..] => Some(bucket.to_string()),
        _ => None,
    }
}
