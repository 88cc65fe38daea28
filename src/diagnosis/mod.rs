pub mod executor;
pub mod locator;
mod process;
pub mod runner;
#[cfg(test)]
pub(crate) mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::access::{AccessGate, Caller, ConfigAccessPolicy};
use crate::config::AppConfig;
use crate::error::Result;
use crate::metadata::bad_query::FileBadQueryStore;
use crate::metadata::jobs::FileJobStore;
use crate::metadata::types::BadQueryHistory;
use crate::metadata::{validate_identifier, BadQueryStore};
use crate::workspace::WorkspaceManager;

use executor::ShellExecutor;
use runner::DiagnosticRunner;

/// What a diagnosis is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosisTarget {
    Project(String),
    Job(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosisKind {
    Project,
    Job,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosisRequest {
    pub target: DiagnosisTarget,
}

impl DiagnosisRequest {
    pub fn project(project: impl Into<String>) -> Self {
        Self {
            target: DiagnosisTarget::Project(project.into()),
        }
    }

    pub fn job(job_id: impl Into<String>) -> Self {
        Self {
            target: DiagnosisTarget::Job(job_id.into()),
        }
    }

    pub fn kind(&self) -> DiagnosisKind {
        match self.target {
            DiagnosisTarget::Project(_) => DiagnosisKind::Project,
            DiagnosisTarget::Job(_) => DiagnosisKind::Job,
        }
    }

    /// The identifier handed to the script.
    pub fn identifier(&self) -> &str {
        match &self.target {
            DiagnosisTarget::Project(id) | DiagnosisTarget::Job(id) => id,
        }
    }
}

/// A located diagnosis package and the workspace that holds it.
///
/// The receiver owns `workspace` and is expected to remove it once the bundle
/// has been delivered.
#[derive(Debug, Clone)]
pub struct DiagnosisBundle {
    pub path: PathBuf,
    pub workspace: PathBuf,
}

/// Entry point for diagnosis and bad-query operations. Every operation is permission-gated.
pub struct DiagnosisService {
    gate: AccessGate,
    runner: DiagnosticRunner,
    bad_queries: Arc<dyn BadQueryStore>,
}

impl DiagnosisService {
    pub fn new(gate: AccessGate, runner: DiagnosticRunner, bad_queries: Arc<dyn BadQueryStore>) -> Self {
        Self {
            gate,
            runner,
            bad_queries,
        }
    }

    /// Wire the service with the local shell executor and file-backed metadata.
    pub fn from_config(config: &AppConfig) -> Self {
        let metadata_dir = config.metadata_dir();
        let gate = AccessGate::new(
            Arc::new(ConfigAccessPolicy::new(&config.access)),
            Arc::new(FileJobStore::new(&metadata_dir)),
        );
        let runner = DiagnosticRunner::new(
            &config.diagnosis,
            Arc::new(ShellExecutor::new(config.diagnosis.max_output_bytes)),
            WorkspaceManager::new(&config.workspace),
        );
        Self::new(gate, runner, Arc::new(FileBadQueryStore::new(&metadata_dir)))
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        self.runner.workspaces()
    }

    pub async fn bad_query_history(&self, caller: &Caller, project: &str) -> Result<BadQueryHistory> {
        validate_identifier("project", project)?;
        self.gate.check_project_access(caller, project).await?;
        self.bad_queries.bad_queries_for_project(project).await
    }

    pub async fn dump_project_diagnosis(
        &self,
        caller: &Caller,
        project: &str,
        cancel: &CancellationToken,
    ) -> Result<DiagnosisBundle> {
        self.diagnose(caller, &DiagnosisRequest::project(project), cancel)
            .await
    }

    pub async fn dump_job_diagnosis(
        &self,
        caller: &Caller,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DiagnosisBundle> {
        self.diagnose(caller, &DiagnosisRequest::job(job_id), cancel)
            .await
    }

    pub async fn diagnose(
        &self,
        caller: &Caller,
        request: &DiagnosisRequest,
        cancel: &CancellationToken,
    ) -> Result<DiagnosisBundle> {
        match &request.target {
            DiagnosisTarget::Project(project) => {
                validate_identifier("project", project)?;
                self.gate.check_project_access(caller, project).await?;
            }
            DiagnosisTarget::Job(job_id) => {
                validate_identifier("job id", job_id)?;
                self.gate.check_job_access(caller, job_id).await?;
            }
        }

        tracing::info!(
            user = %caller.user,
            kind = ?request.kind(),
            identifier = %request.identifier(),
            "Starting diagnosis"
        );

        let bundle = self.runner.run(request.identifier(), cancel).await?;

        tracing::info!(
            identifier = %request.identifier(),
            bundle = %bundle.path.display(),
            "Diagnosis package ready"
        );
        Ok(bundle)
    }
}
