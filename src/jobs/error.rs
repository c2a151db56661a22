use std::fmt;

use thiserror::Error;

use crate::db::StoreError;
use crate::document::DocumentError;
use crate::models::InvalidTransition;
use crate::publish::PublishError;
use crate::render::RenderError;
use crate::storage::StorageError;
use crate::{truncate_chars, MAX_ERROR_CHARS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Job,
    Form,
    Template,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Job => "job",
            Self::Form => "form",
            Self::Template => "template",
        })
    }
}

/// Everything that can stop a generation run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{kind} {id} not found")]
    NotFound { kind: RecordKind, id: String },
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("storage access failed: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("document store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to prepare working directory: {0}")]
    Workspace(#[source] std::io::Error),
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl PipelineError {
    pub fn not_found(kind: RecordKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable name of the error class, as persisted and returned to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFoundError",
            Self::Validation(_) | Self::Publish(PublishError::InvalidPathComponent(_)) => {
                "ValidationError"
            }
            Self::Document(DocumentError::TemplateMalformed(_) | DocumentError::Read(_)) => {
                "TemplateMalformedError"
            }
            Self::Document(DocumentError::Write(_)) => "WriteError",
            Self::Storage(_) | Self::Publish(PublishError::Upload(_)) => "StorageAccessError",
            Self::Render(RenderError::FileNotFound(_)) => "FileNotFoundError",
            Self::Render(RenderError::ConverterUnavailable | RenderError::Spawn(_)) => {
                "ConverterUnavailableError"
            }
            Self::Render(RenderError::RenderFailed { .. }) => "RenderFailedError",
            Self::Render(RenderError::RenderIncomplete(_)) => "RenderIncompleteError",
            Self::Publish(_) => "UrlGenerationError",
            Self::Store(_) => "DocumentStoreError",
            Self::Workspace(_) => "WriteError",
            Self::Transition(_) => "InvalidTransitionError",
        }
    }

    /// `"<Kind>: <message>"`, bounded for storage on the job record.
    pub fn diagnostic(&self) -> String {
        truncate_chars(&format!("{}: {}", self.kind(), self), MAX_ERROR_CHARS)
    }
}

/// Failure reported back to whoever triggered a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {job_id} failed: {details}")]
pub struct JobFailure {
    pub job_id: String,
    pub kind: String,
    pub details: String,
}

impl JobFailure {
    pub fn new(job_id: &str, error: &PipelineError) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind: error.kind().to_string(),
            details: error.diagnostic(),
        }
    }

    /// A failure recorded by an earlier delivery.
    pub fn recorded(job_id: &str, error: Option<&str>) -> Self {
        let details = error.unwrap_or("job previously failed").to_string();
        let kind = details
            .split_once(':')
            .map(|(kind, _)| kind.trim().to_string())
            .filter(|kind| kind.ends_with("Error"))
            .unwrap_or_else(|| "PreviouslyFailed".to_string());
        Self {
            job_id: job_id.to_string(),
            kind,
            details,
        }
    }
}
