use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// Finds the archive a diagnosis script left in its workspace.
///
/// Only files one level down (`<workspace>/<subdir>/<file>`) are candidates. Entries
/// are visited in the order the filesystem lists them, so when a script leaves more
/// than one archive behind, which one wins is unspecified.
#[derive(Debug, Clone)]
pub struct BundleLocator {
    suffix: String,
}

impl BundleLocator {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    pub async fn locate(&self, workspace_root: &Path) -> Result<PathBuf> {
        let not_available = || AppError::PackageNotAvailable {
            path: workspace_root.to_path_buf(),
        };

        let mut entries = tokio::fs::read_dir(workspace_root).await.map_err(|e| {
            tracing::warn!(workspace = %workspace_root.display(), error = %e, "Cannot list workspace");
            not_available()
        })?;

        while let Some(entry) = entries.next_entry().await.map_err(|_| not_available())? {
            let subdir = entry.path();
            // Follows symlinks
            let is_dir = tokio::fs::metadata(&subdir)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }

            if let Some(bundle) = self.first_archive_in(&subdir).await {
                tracing::info!(bundle = %bundle.display(), "Located diagnosis package");
                return Ok(bundle);
            }
        }

        Err(AppError::PackageNotFound {
            path: workspace_root.to_path_buf(),
        })
    }

    async fn first_archive_in(&self, dir: &Path) -> Option<PathBuf> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                return None;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Directory listing failed");
                    return None;
                }
            };

            if !entry.file_name().to_string_lossy().ends_with(&self.suffix) {
                continue;
            }

            let path = entry.path();
            let is_file = tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if is_file {
                return Some(path);
            }
        }
    }
}
