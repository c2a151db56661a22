use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Scratch directory for one job execution.
///
/// Every file of a run (downloaded template, filled document, rendered PDF)
/// lives here; [`JobWorkspace::close`] removes them all at once. Dropping
/// without closing still removes the directory, silently.
pub struct JobWorkspace {
    dir: TempDir,
    label: String,
}

impl JobWorkspace {
    pub fn create(label: &str) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("docgen-").tempdir()?;
        log::debug!("Workspace for {} created", label);
        Ok(Self {
            dir,
            label: label.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Removes the workspace. A cleanup failure is logged and otherwise ignored.
    pub fn close(self) {
        let label = self.label;
        if let Err(e) = self.dir.close() {
            log::warn!("Failed to clean up workspace for {}: {}", label, e);
        } else {
            log::debug!("Workspace for {} removed", label);
        }
    }
}
