use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::metadata::types::JobInstance;
use crate::metadata::{validate_identifier, JobLookup};

/// Reads jobs from `<metadata>/jobs/<job_id>.json`.
pub struct FileJobStore {
    jobs_dir: PathBuf,
}

impl FileJobStore {
    pub fn new(metadata_dir: &Path) -> Self {
        Self {
            jobs_dir: metadata_dir.join("jobs"),
        }
    }
}

#[async_trait]
impl JobLookup for FileJobStore {
    async fn get_job(&self, job_id: &str) -> Result<JobInstance> {
        validate_identifier("job id", job_id)?;

        let path = self.jobs_dir.join(format!("{job_id}.json"));
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::JobNotFound(job_id.to_string()));
            }
            Err(e) => {
                return Err(AppError::Metadata(format!(
                    "Failed to read job {}: {e}",
                    path.display()
                )));
            }
        };

        serde_json::from_slice(&raw).map_err(|e| {
            AppError::Metadata(format!("Invalid job metadata in {}: {e}", path.display()))
        })
    }
}
