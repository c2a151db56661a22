//! Jobs module - the document generation pipeline
//!
//! A job is created upstream in `pending` state; a delivery of its id drives
//! it through `pickedup -> processing -> completed | failed`.
//! - `orchestrator` - state machine and stage sequencing
//! - `handlers` - HTTP trigger endpoint
//! - `workspace` - per-run scratch directory

mod error;
pub mod handlers;
mod orchestrator;
mod workspace;

use serde::Deserialize;
use utoipa::ToSchema;

use crate::models::GeneratedArtifacts;
use crate::publish::UrlPolicy;

pub use error::{JobFailure, PipelineError, RecordKind};
pub use orchestrator::JobOrchestrator;
pub use workspace::JobWorkspace;

/// Notification that a job record was created.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    #[serde(default)]
    pub form_id: Option<String>,
}

impl JobEvent {
    pub fn new(job_id: impl Into<String>, form_id: Option<String>) -> Self {
        Self {
            job_id: job_id.into(),
            form_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// This delivery ran the pipeline to completion.
    Completed {
        job_id: String,
        form_id: String,
        artifacts: GeneratedArtifacts,
    },
    /// The job had already completed; nothing was written.
    AlreadyCompleted {
        job_id: String,
        form_id: Option<String>,
        artifacts: Option<GeneratedArtifacts>,
    },
}

impl JobOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Completed { job_id, .. } | Self::AlreadyCompleted { job_id, .. } => job_id,
        }
    }

    pub fn form_id(&self) -> Option<&str> {
        match self {
            Self::Completed { form_id, .. } => Some(form_id),
            Self::AlreadyCompleted { form_id, .. } => form_id.as_deref(),
        }
    }

    pub fn artifacts(&self) -> Option<&GeneratedArtifacts> {
        match self {
            Self::Completed { artifacts, .. } => Some(artifacts),
            Self::AlreadyCompleted { artifacts, .. } => artifacts.as_ref(),
        }
    }
}

/// Deployment knobs of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_bucket: String,
    /// Used when a template's bucket cannot be read from its download URL.
    pub template_bucket: Option<String>,
    pub url_policy: UrlPolicy,
}

impl PipelineSettings {
    pub fn new(output_bucket: impl Into<String>) -> Self {
        Self {
            output_bucket: output_bucket.into(),
            template_bucket: None,
            url_policy: UrlPolicy::default(),
        }
    }
}
