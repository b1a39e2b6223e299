//! Read-only sources of stage evidence (screening scores, transcripts,
//! assessment results). The orchestrator treats the data as opaque JSON.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{MarathonError, Result};
use crate::state_machine::{ProcessState, Stage};

#[async_trait]
pub trait StageDataProvider: Send + Sync {
    /// Whether the application exists for the job.
    async fn application_exists(&self, job_id: &str, application_id: &str) -> Result<bool>;

    /// Evidence for `stage`. `Value::Null` means nothing is available yet.
    async fn fetch(&self, process: &ProcessState, stage: Stage) -> Result<Value>;
}

/// Stage data laid out on disk as `<root>/<job>/<application>/<stage>.json`.
pub struct FileStageData {
    root: PathBuf,
}

impl FileStageData {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn application_dir(&self, job_id: &str, application_id: &str) -> Result<PathBuf> {
        for part in [job_id, application_id] {
            if part.is_empty() || part.contains(['/', '\\']) || part == "." || part == ".." {
                return Err(MarathonError::StageData(format!("invalid path segment {part:?}")));
            }
        }
        Ok(self.root.join(job_id).join(application_id))
    }
}

#[async_trait]
impl StageDataProvider for FileStageData {
    async fn application_exists(&self, job_id: &str, application_id: &str) -> Result<bool> {
        let dir = self.application_dir(job_id, application_id)?;
        Ok(tokio::fs::metadata(&dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    async fn fetch(&self, process: &ProcessState, stage: Stage) -> Result<Value> {
        let path = self
            .application_dir(&process.job_id, &process.application_id)?
            .join(format!("{stage}.json"));
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                MarathonError::StageData(format!("{}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Null),
            Err(e) => Err(MarathonError::StageData(format!("{}: {e}", path.display()))),
        }
    }
}
