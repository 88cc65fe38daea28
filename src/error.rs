use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No caller identity on request")]
    Unauthenticated,

    #[error("Access denied: user '{user}' has no operation permission on project '{project}'")]
    PermissionDenied { user: String, project: String },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("diag.sh not found at {}.", path.display())]
    ScriptNotFound { path: PathBuf },

    #[error("Failed to generate diagnosis package.")]
    DiagnosisExecution,

    #[error("Diagnosis was cancelled.")]
    DiagnosisCancelled,

    #[error("Diagnosis timed out.")]
    DiagnosisTimedOut,

    #[error("Diagnosis package is not available in directory: {}.", path.display())]
    PackageNotAvailable { path: PathBuf },

    #[error("Diagnosis package not found in directory: {}.", path.display())]
    PackageNotFound { path: PathBuf },

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors the caller caused or can act on, as opposed to server-side faults.
    pub fn is_client_facing(&self) -> bool {
        !matches!(
            self,
            AppError::Config(_)
                | AppError::Workspace(_)
                | AppError::Metadata(_)
                | AppError::Serialization(_)
                | AppError::Io(_)
                | AppError::Internal(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
