//! PDF rendering through a headless office suite.
//!
//! The converter is an opaque external process: it gets an input path and an
//! output directory and is expected to leave `<stem>.pdf` next to the input.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;

use crate::truncate_chars;

/// Binaries tried in order when no explicit converter path is configured.
const CONVERTER_CANDIDATES: [&str; 2] = ["libreoffice", "soffice"];

/// Upper bound on the converter's stderr kept in an error.
pub const MAX_STDERR_CHARS: usize = 500;

static FILE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"file://[^\s<>"']*"#).expect("file URL pattern is valid"));

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("input document does not exist")]
    FileNotFound(PathBuf),
    #[error("PDF converter is not available on this host")]
    ConverterUnavailable,
    #[error("failed to launch PDF converter: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("PDF converter exited with status {code}: {stderr}")]
    RenderFailed { code: i32, stderr: String },
    #[error("PDF converter reported success but produced no PDF")]
    RenderIncomplete(PathBuf),
}

#[async_trait]
pub trait PdfConverter: Send + Sync {
    /// Converts `input` to PDF and returns the path of the produced file.
    async fn convert(&self, input: &Path) -> Result<PathBuf, RenderError>;
}

/// Converter backed by LibreOffice (`--headless --convert-to pdf`).
#[derive(Debug, Clone, Default)]
pub struct LibreOfficeConverter {
    binary: Option<PathBuf>,
}

impl LibreOfficeConverter {
    /// `binary` overrides the `PATH` lookup.
    pub fn new(binary: Option<PathBuf>) -> Self {
        Self { binary }
    }

    fn resolve_binary(&self) -> Result<PathBuf, RenderError> {
        match &self.binary {
            Some(path) if path.is_file() => Ok(path.clone()),
            Some(_) => Err(RenderError::ConverterUnavailable),
            None => CONVERTER_CANDIDATES
                .iter()
                .find_map(|name| find_in_path(name))
                .ok_or(RenderError::ConverterUnavailable),
        }
    }
}

#[async_trait]
impl PdfConverter for LibreOfficeConverter {
    async fn convert(&self, input: &Path) -> Result<PathBuf, RenderError> {
        if !input.exists() {
            return Err(RenderError::FileNotFound(input.to_path_buf()));
        }
        let binary = self.resolve_binary()?;
        let output_dir = input.parent().unwrap_or_else(|| Path::new("."));
        let expected = expected_pdf_path(input);

        log::info!(
            "Running {} --headless --convert-to pdf --outdir {} {}",
            binary.display(),
            output_dir.display(),
            input.display()
        );

        let output = Command::new(&binary)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(output_dir)
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(RenderError::Spawn)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            log::debug!("Converter stdout: {}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            log::warn!("Converter stderr: {}", stderr.trim());
        }

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            log::error!("Converter failed with code {}", code);
            let stderr = redact_paths(stderr.trim(), output_dir);
            return Err(RenderError::RenderFailed {
                code,
                stderr: truncate_chars(&stderr, MAX_STDERR_CHARS),
            });
        }

        // Exit status alone is not trusted; the file has to be there.
        if !expected.is_file() {
            return Err(RenderError::RenderIncomplete(expected));
        }

        log::info!("Converted to PDF: {}", expected.display());
        Ok(expected)
    }
}

/// `<dir>/<stem>.pdf` for an input `<dir>/<stem>.<ext>`.
pub fn expected_pdf_path(input: &Path) -> PathBuf {
    input.with_extension("pdf")
}

/// Strips local file locations from converter output before it leaves the host.
fn redact_paths(text: &str, dir: &Path) -> String {
    let text = FILE_URL.replace_all(text, "<file>");
    let dir = dir.to_string_lossy();
    if dir.is_empty() || dir == "." {
        return text.into_owned();
    }
    text.replace(&*dir, "<workdir>")
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
