pub mod bad_query;
pub mod jobs;
pub mod types;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use types::*;

/// Job-metadata lookup.
#[async_trait]
pub trait JobLookup: Send + Sync {
    /// Fetch a job by id. Unknown ids yield `AppError::JobNotFound`.
    async fn get_job(&self, job_id: &str) -> Result<JobInstance>;
}

/// Source of recorded slow or failed queries per project.
#[async_trait]
pub trait BadQueryStore: Send + Sync {
    async fn bad_queries_for_project(&self, project: &str) -> Result<BadQueryHistory>;
}

/// Validate a project name or job id before it reaches a command line or a file path.
///
/// Accepts ASCII alphanumerics, `_` and `-`, and rejects a leading `-` so the value
/// can never be read as a script option.
pub fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(AppError::InvalidIdentifier(format!("{kind} must not be empty")));
    }
    if value.starts_with('-') {
        return Err(AppError::InvalidIdentifier(format!(
            "{kind} must not start with '-': {value}"
        )));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(AppError::InvalidIdentifier(format!(
            "{kind} contains unsupported character {c:?}: {value}"
        )));
    }
    Ok(())
}
