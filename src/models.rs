use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

/// Lifecycle of a generation job.
///
/// Transitions only move forward: `pending -> pickedup -> processing -> completed | failed`.
/// Any non-terminal state may fail; a failure recorded before pickup still has to land.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Pickedup,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Pickedup => 1,
            Self::Processing => 2,
            Self::Completed | Self::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed => true,
            _ => next.rank() == self.rank() + 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Pickedup => "pickedup",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub form_id: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Timestamps are informational; RFC 3339 strings and epoch seconds are
/// accepted, anything else reads as absent.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|time| time.with_timezone(&Utc)),
        Some(Value::Number(number)) => number
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        _ => None,
    })
}

impl Job {
    /// Moves the job to `next` and returns the field patch to persist.
    ///
    /// `error` is kept only for `failed`; every other target clears it.
    pub fn transition(
        &mut self,
        next: JobStatus,
        error: Option<String>,
    ) -> Result<Map<String, Value>, InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        self.status = next;
        self.error = if next == JobStatus::Failed {
            Some(error.unwrap_or_else(|| "unknown error".to_string()))
        } else {
            None
        };
        self.updated_at = Some(now);

        let mut patch = Map::new();
        patch.insert("status".into(), json!(next));
        patch.insert("error".into(), json!(self.error));
        patch.insert("updatedAt".into(), json!(now));
        Ok(patch)
    }
}

/// A form field as submitted by the caller.
///
/// The front-end stores either a bare scalar or an object carrying the value
/// next to display metadata.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Structured(StructuredValue),
    Scalar(Value),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StructuredValue {
    pub value: Value,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl FieldValue {
    /// Text substituted into the document for this field.
    pub fn as_text(&self) -> String {
        match self {
            Self::Structured(structured) => json_to_text(&structured.value),
            Self::Scalar(value) => json_to_text(value),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Scalar(Value::String(value.to_string()))
    }
}

fn json_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub type FormValues = BTreeMap<String, FieldValue>;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Form {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub office_id: Option<String>,
    #[serde(default)]
    pub form_data: FormValues,
    #[serde(default)]
    pub generated_pdf_url: Option<String>,
    #[serde(default)]
    pub generated_pdf_path: Option<String>,
    #[serde(default)]
    pub generated_docx_url: Option<String>,
    #[serde(default)]
    pub generated_docx_path: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl Form {
    /// Artifacts recorded by a previous successful run, if all four fields are present.
    pub fn generated_artifacts(&self) -> Option<GeneratedArtifacts> {
        Some(GeneratedArtifacts {
            pdf_path: self.generated_pdf_path.clone()?,
            pdf_url: self.generated_pdf_url.clone()?,
            docx_path: self.generated_docx_path.clone()?,
            docx_url: self.generated_docx_url.clone()?,
        })
    }
}

/// The four generated-* fields written onto a form in a single update.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, ToSchema)]
pub struct GeneratedArtifacts {
    pub pdf_path: String,
    pub pdf_url: String,
    pub docx_path: String,
    pub docx_url: String,
}

impl GeneratedArtifacts {
    pub fn to_form_patch(&self) -> Map<String, Value> {
        let mut patch = Map::new();
        patch.insert("generatedPdfUrl".into(), json!(self.pdf_url));
        patch.insert("generatedPdfPath".into(), json!(self.pdf_path));
        patch.insert("generatedDocxUrl".into(), json!(self.docx_url));
        patch.insert("generatedDocxPath".into(), json!(self.docx_path));
        patch.insert("status".into(), json!("completed"));
        patch.insert("updatedAt".into(), json!(Utc::now()));
        patch
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, ToSchema)]
pub struct PlaceholderConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
    pub alias: String,
}

impl PlaceholderConfig {
    /// Default schema entry for a placeholder discovered in a freshly uploaded template.
    pub fn discovered(name: &str) -> Self {
        Self {
            kind: "long_text".to_string(),
            required: true,
            alias: title_case_alias(name),
        }
    }
}

fn title_case_alias(name: &str) -> String {
    name.replace('_', " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub storage_path: Option<String>,
    #[serde(rename = "downloadURL", default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub placeholders: BTreeMap<String, PlaceholderConfig>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
