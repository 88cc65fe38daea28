use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::AccessConfig;
use crate::error::{AppError, Result};
use crate::metadata::JobLookup;

/// The identity a request is made on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user: String,
}

impl Caller {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }
}

/// Project-scoped grant, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectPermission {
    Read,
    Operation,
    Management,
    Admin,
}

#[async_trait]
pub trait AccessPolicy: Send + Sync {
    /// Whether `caller` may run operational actions (such as diagnosis) on `project`.
    async fn has_operation_permission(&self, caller: &Caller, project: &str) -> Result<bool>;
}

/// Access policy backed by the `[access]` config table.
///
/// User and project names are matched case-insensitively.
pub struct ConfigAccessPolicy {
    admins: HashSet<String>,
    grants: HashMap<String, HashMap<String, ProjectPermission>>,
}

impl ConfigAccessPolicy {
    pub fn new(config: &AccessConfig) -> Self {
        let admins = config.admins.iter().map(|u| u.to_ascii_lowercase()).collect();
        let grants = config
            .projects
            .iter()
            .map(|(project, users)| {
                let users = users
                    .iter()
                    .map(|(user, perm)| (user.to_ascii_lowercase(), *perm))
                    .collect();
                (project.to_ascii_lowercase(), users)
            })
            .collect();
        Self { admins, grants }
    }

    fn permission(&self, user: &str, project: &str) -> Option<ProjectPermission> {
        self.grants
            .get(&project.to_ascii_lowercase())
            .and_then(|users| users.get(&user.to_ascii_lowercase()))
            .copied()
    }
}

#[async_trait]
impl AccessPolicy for ConfigAccessPolicy {
    async fn has_operation_permission(&self, caller: &Caller, project: &str) -> Result<bool> {
        if self.admins.contains(&caller.user.to_ascii_lowercase()) {
            return Ok(true);
        }
        Ok(self
            .permission(&caller.user, project)
            .is_some_and(|perm| perm >= ProjectPermission::Operation))
    }
}

/// First stage of every diagnosis: nothing runs unless this passes.
pub struct AccessGate {
    policy: Arc<dyn AccessPolicy>,
    jobs: Arc<dyn JobLookup>,
}

impl AccessGate {
    pub fn new(policy: Arc<dyn AccessPolicy>, jobs: Arc<dyn JobLookup>) -> Self {
        Self { policy, jobs }
    }

    pub async fn check_project_access(&self, caller: &Caller, project: &str) -> Result<()> {
        if self.policy.has_operation_permission(caller, project).await? {
            return Ok(());
        }
        tracing::warn!(user = %caller.user, project = %project, "Operation permission denied");
        Err(AppError::PermissionDenied {
            user: caller.user.clone(),
            project: project.to_string(),
        })
    }

    /// Resolve the job's owning project and check access on it. Returns the project.
    pub async fn check_job_access(&self, caller: &Caller, job_id: &str) -> Result<String> {
        let job = self.jobs.get_job(job_id).await?;
        tracing::debug!(job_id = %job_id, project = %job.project, "Resolved job to project");
        self.check_project_access(caller, &job.project).await?;
        Ok(job.project)
    }
}
