use std::sync::Arc;

use serde::Deserialize;

use crate::common::artifact_stem;
use crate::db::{fetch_record, Collection, DocumentStore, StoreError};
use crate::document;
use crate::models::{Form, GeneratedArtifacts, Job, JobStatus, Template};
use crate::publish::{is_path_component, ArtifactKind, ArtifactPublisher};
use crate::render::PdfConverter;
use crate::storage::ObjectStorage;
use crate::templates::template_location;

use super::{JobEvent, JobFailure, JobOutcome, JobWorkspace, PipelineError, PipelineSettings, RecordKind};

const TEMPLATE_FILE: &str = "template.docx";

/// Drives one job from its persisted state to a terminal state.
///
/// The orchestrator keeps no state between deliveries: what it does is
/// decided by the job record alone, so the same event may be delivered again.
pub struct JobOrchestrator {
    documents: Arc<dyn DocumentStore>,
    storage: Arc<dyn ObjectStorage>,
    converter: Arc<dyn PdfConverter>,
    publisher: ArtifactPublisher,
    settings: PipelineSettings,
}

impl JobOrchestrator {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        storage: Arc<dyn ObjectStorage>,
        converter: Arc<dyn PdfConverter>,
        settings: PipelineSettings,
    ) -> Self {
        let publisher = ArtifactPublisher::new(
            storage.clone(),
            settings.output_bucket.clone(),
            settings.url_policy.clone(),
        );
        Self {
            documents,
            storage,
            converter,
            publisher,
            settings,
        }
    }

    pub async fn handle(&self, event: JobEvent) -> Result<JobOutcome, JobFailure> {
        let job_id = event.job_id.as_str();
        log::info!("Received job {}", job_id);

        let mut job = match self.load_job(job_id).await {
            Ok(job) => job,
            Err(e) => return Err(self.fail_unloaded(&event, e).await),
        };

        match job.status {
            JobStatus::Completed => return Ok(self.already_completed(job, &event).await),
            JobStatus::Failed => {
                log::info!("Job {} already failed; ignoring redelivery", job_id);
                return Err(JobFailure::recorded(job_id, job.error.as_deref()));
            }
            JobStatus::Pickedup | JobStatus::Processing => {
                log::warn!("Job {} found in {}; resuming", job_id, job.status);
            }
            JobStatus::Pending => {}
        }

        let workspace = match JobWorkspace::create(&format!("job {job_id}")) {
            Ok(workspace) => workspace,
            Err(e) => return Err(self.fail(&mut job, PipelineError::Workspace(e)).await),
        };
        let result = self.run(&mut job, &event, &workspace).await;
        workspace.close();

        match result {
            Ok((form_id, artifacts)) => {
                log::info!("Job {} completed", job_id);
                Ok(JobOutcome::Completed {
                    job_id: job_id.to_string(),
                    form_id,
                    artifacts,
                })
            }
            Err(e) => Err(self.fail(&mut job, e).await),
        }
    }

    async fn run(
        &self,
        job: &mut Job,
        event: &JobEvent,
        workspace: &JobWorkspace,
    ) -> Result<(String, GeneratedArtifacts), PipelineError> {
        if job.status == JobStatus::Pending {
            self.advance(job, JobStatus::Pickedup).await?;
        }

        let form_id = event
            .form_id
            .clone()
            .or_else(|| job.form_id.clone())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PipelineError::validation("job has no formId"))?;
        let form = fetch_record::<Form>(self.documents.as_ref(), Collection::Forms, &form_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(RecordKind::Form, &form_id))?;
        let template_id = required_field(form.template_id.as_deref(), "templateId")?;
        let office_id = required_field(form.office_id.as_deref(), "officeId")?;
        for (name, value) in [("officeId", office_id), ("jobId", job.id.as_str())] {
            if !is_path_component(value) {
                return Err(PipelineError::validation(format!(
                    "{name} {value:?} is not a valid path component"
                )));
            }
        }

        let template =
            fetch_record::<Template>(self.documents.as_ref(), Collection::Templates, template_id)
                .await?
                .ok_or_else(|| PipelineError::not_found(RecordKind::Template, template_id))?;
        let (bucket, path) = template_location(&template, self.settings.template_bucket.as_deref())?;

        let template_file = workspace.file(TEMPLATE_FILE);
        self.storage.download(&bucket, &path, &template_file).await?;
        log::info!("Job {}: template {} downloaded", job.id, template_id);

        if job.status == JobStatus::Pickedup {
            self.advance(job, JobStatus::Processing).await?;
        }

        let stem = artifact_stem(&path, &form_id);
        let docx_file = workspace.file(&format!("{stem}.docx"));
        let replaced = document::fill(&template_file, &docx_file, &form.form_data)?;
        log::info!("Job {}: filled {} placeholder occurrences", job.id, replaced);

        let pdf_file = self.converter.convert(&docx_file).await?;
        log::info!("Job {}: PDF rendered", job.id);

        let docx = self
            .publisher
            .publish(&job.id, office_id, &docx_file, ArtifactKind::Docx)
            .await?;
        let pdf = self
            .publisher
            .publish(&job.id, office_id, &pdf_file, ArtifactKind::Pdf)
            .await?;

        let artifacts = GeneratedArtifacts {
            pdf_path: pdf.path,
            pdf_url: pdf.url,
            docx_path: docx.path,
            docx_url: docx.url,
        };
        self.documents
            .update(Collection::Forms, &form_id, artifacts.to_form_patch())
            .await?;
        log::info!("Job {}: form {} updated with generated documents", job.id, form_id);

        self.advance(job, JobStatus::Completed).await?;
        Ok((form_id, artifacts))
    }

    async fn load_job(&self, job_id: &str) -> Result<Job, PipelineError> {
        if job_id.trim().is_empty() {
            return Err(PipelineError::validation("jobId is empty"));
        }
        fetch_record::<Job>(self.documents.as_ref(), Collection::Jobs, job_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(RecordKind::Job, job_id))
    }

    /// Persists the transition; `job` only changes once the write succeeded.
    async fn advance(&self, job: &mut Job, next: JobStatus) -> Result<(), PipelineError> {
        let mut advanced = job.clone();
        let patch = advanced.transition(next, None)?;
        self.documents.update(Collection::Jobs, &job.id, patch).await?;
        *job = advanced;
        log::info!("Job {} is now {}", job.id, next);
        Ok(())
    }

    /// Records the failure on the job. The write is best-effort; the failure
    /// is returned either way.
    async fn fail(&self, job: &mut Job, error: PipelineError) -> JobFailure {
        let failure = JobFailure::new(&job.id, &error);
        log::error!("Job {} failed: {}", job.id, failure.details);

        match job.transition(JobStatus::Failed, Some(failure.details.clone())) {
            Ok(patch) => {
                if let Err(e) = self.documents.update(Collection::Jobs, &job.id, patch).await {
                    log::warn!("Could not record failure of job {}: {}", job.id, e);
                }
            }
            Err(e) => log::warn!("Could not record failure of job {}: {}", job.id, e),
        }
        failure
    }

    /// A job whose record could not be loaded is marked failed only when its
    /// stored status is readable and still non-terminal.
    async fn fail_unloaded(&self, event: &JobEvent, error: PipelineError) -> JobFailure {
        let job_id = event.job_id.as_str();
        let status = match &error {
            PipelineError::Store(StoreError::Decode { .. }) => self.stored_status(job_id).await,
            _ => None,
        };

        match status {
            Some(status) if !status.is_terminal() => {
                let mut job = Job {
                    id: job_id.to_string(),
                    form_id: event.form_id.clone(),
                    status,
                    error: None,
                    created_at: None,
                    updated_at: None,
                };
                self.fail(&mut job, error).await
            }
            _ => {
                let failure = JobFailure::new(job_id, &error);
                log::error!("Job {} could not be loaded: {}", job_id, failure.details);
                failure
            }
        }
    }

    async fn stored_status(&self, job_id: &str) -> Option<JobStatus> {
        #[derive(Deserialize)]
        struct StatusOnly {
            status: JobStatus,
        }

        let record = self.documents.get(Collection::Jobs, job_id).await.ok()??;
        serde_json::from_value::<StatusOnly>(record)
            .ok()
            .map(|stored| stored.status)
    }

    async fn already_completed(&self, job: Job, event: &JobEvent) -> JobOutcome {
        log::info!("Job {} already completed; nothing to do", job.id);
        let form_id = event.form_id.clone().or(job.form_id);

        let artifacts = match &form_id {
            Some(form_id) => {
                match fetch_record::<Form>(self.documents.as_ref(), Collection::Forms, form_id).await {
                    Ok(form) => form.and_then(|form| form.generated_artifacts()),
                    Err(e) => {
                        log::warn!("Could not read form {} of completed job {}: {}", form_id, job.id, e);
                        None
                    }
                }
            }
            None => None,
        };

        JobOutcome::AlreadyCompleted {
            job_id: job.id,
            form_id,
            artifacts,
        }
    }
}

fn required_field<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, PipelineError> {
    value
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| PipelineError::validation(format!("form has no {name}")))
}
