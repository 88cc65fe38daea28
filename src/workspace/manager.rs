use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::config::WorkspaceConfig;
use crate::error::{AppError, Result};

/// Name prefix of every workspace directory; the janitor only touches these.
pub const WORKSPACE_PREFIX: &str = "diag-";

/// Manages per-request output directories for diagnosis runs.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

/// A freshly allocated, empty output directory. `path` is absolute.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub path: PathBuf,
}

impl WorkspaceManager {
    pub fn new(config: &WorkspaceConfig) -> Self {
        Self::with_base_dir(config.base_dir.clone())
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Ensure the base directory exists and return its canonical form.
    async fn prepare_base_dir(&self) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to create workspace dir: {e}")))?;
        tokio::fs::canonicalize(&self.base_dir)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to resolve workspace dir: {e}")))
    }

    /// Create a new uniquely named workspace under the base directory.
    ///
    /// The directory outlives this call: ownership passes to whoever receives the
    /// resulting bundle, and the janitor reclaims anything left behind.
    pub async fn allocate(&self) -> Result<Workspace> {
        let base = self.prepare_base_dir().await?;

        let path = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(WORKSPACE_PREFIX)
                .tempdir_in(&base)
                .map(|dir| dir.keep())
        })
        .await
        .map_err(|e| AppError::Workspace(format!("Allocate task panicked: {e}")))?
        .map_err(|e| AppError::Workspace(format!("Failed to create workspace: {e}")))?;

        tracing::debug!(workspace = %path.display(), "Allocated workspace");
        Ok(Workspace { path })
    }

    /// Remove a workspace directory.
    pub async fn cleanup(&self, workspace: &Path) -> Result<()> {
        if workspace.exists() {
            tokio::fs::remove_dir_all(workspace)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to cleanup workspace: {e}")))?;
        }
        Ok(())
    }

    /// Remove workspaces older than `retention`. Returns how many were removed.
    pub async fn sweep(&self, retention: Duration) -> Result<usize> {
        let mut dir = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(AppError::Workspace(format!(
                    "Failed to read workspace dir: {e}"
                )))
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(WORKSPACE_PREFIX) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(m) if m.is_dir() => m,
                _ => continue,
            };

            let born = metadata.created().or_else(|_| metadata.modified())?;
            let age = now.duration_since(born).unwrap_or_default();
            if age < retention {
                continue;
            }

            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    tracing::info!(workspace = %entry.path().display(), age_secs = age.as_secs(), "Removed expired workspace");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(workspace = %entry.path().display(), error = %e, "Failed to remove expired workspace");
                }
            }
        }

        Ok(removed)
    }

    /// Verify a path names an existing file inside some workspace (path traversal protection).
    pub fn verify_path(&self, requested_path: &Path) -> Result<PathBuf> {
        let canonical = requested_path
            .canonicalize()
            .map_err(|e| AppError::Workspace(format!("Failed to resolve path: {e}")))?;

        let canonical_root = self
            .base_dir
            .canonicalize()
            .map_err(|e| AppError::Workspace(format!("Failed to resolve workspace root: {e}")))?;

        let inside_workspace = canonical
            .strip_prefix(&canonical_root)
            .ok()
            .and_then(|rel| rel.components().next())
            .is_some_and(|first| {
                first
                    .as_os_str()
                    .to_string_lossy()
                    .starts_with(WORKSPACE_PREFIX)
            });

        if !inside_workspace {
            return Err(AppError::Workspace(format!(
                "Path traversal detected: {} is outside the workspace root",
                requested_path.display()
            )));
        }

        Ok(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn manager(tmp: &tempfile::TempDir) -> WorkspaceManager {
        WorkspaceManager::with_base_dir(tmp.path().join("workspaces"))
    }

    #[tokio::test]
    async fn test_allocate_creates_distinct_absolute_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(&tmp);

        let a = mgr.allocate().await.unwrap();
        let b = mgr.allocate().await.unwrap();

        assert_ne!(a.path, b.path);
        assert!(a.path.is_absolute());
        assert!(a.path.is_dir());
        assert_eq!(fs::read_dir(&a.path).unwrap().count(), 0);
        assert!(a
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(WORKSPACE_PREFIX));
    }

    #[tokio::test]
    async fn test_cleanup_removes_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(&tmp);
        let ws = mgr.allocate().await.unwrap();
        fs::create_dir_all(ws.path.join("pkg")).unwrap();

        mgr.cleanup(&ws.path).await.unwrap();
        assert!(!ws.path.exists());
        // Idempotent
        mgr.cleanup(&ws.path).await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_respects_retention_and_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(&tmp);
        let ws = mgr.allocate().await.unwrap();
        let foreign = mgr.base_dir().join("keep-me");
        fs::create_dir_all(&foreign).unwrap();

        assert_eq!(mgr.sweep(Duration::from_secs(3600)).await.unwrap(), 0);
        assert!(ws.path.exists());

        assert_eq!(mgr.sweep(Duration::ZERO).await.unwrap(), 1);
        assert!(!ws.path.exists());
        assert!(foreign.exists());
    }

    #[tokio::test]
    async fn test_sweep_without_base_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(&tmp);
        assert_eq!(mgr.sweep(Duration::ZERO).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_verify_path_accepts_bundle_inside_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(&tmp);
        let ws = mgr.allocate().await.unwrap();
        fs::create_dir_all(ws.path.join("pkg1")).unwrap();
        let bundle = ws.path.join("pkg1/diag.zip");
        fs::write(&bundle, b"PK").unwrap();

        let verified = mgr.verify_path(&bundle).unwrap();
        assert!(verified.ends_with("pkg1/diag.zip"));
    }

    #[tokio::test]
    async fn test_verify_path_rejects_outside_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(&tmp);
        mgr.allocate().await.unwrap();
        let outside = tmp.path().join("secret.zip");
        fs::write(&outside, b"PK").unwrap();

        let err = mgr.verify_path(&outside).unwrap_err();
        assert!(err.to_string().contains("Path traversal detected"));

        let dotted = mgr.base_dir().join("..").join("secret.zip");
        assert!(mgr.verify_path(&dotted).is_err());
    }
}
