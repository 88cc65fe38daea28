use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::metadata::types::{BadQueryEntry, BadQueryHistory};
use crate::metadata::{validate_identifier, BadQueryStore};

/// Reads `<metadata>/bad_query/<project>.json`, a JSON array of entries.
pub struct FileBadQueryStore {
    dir: PathBuf,
}

impl FileBadQueryStore {
    pub fn new(metadata_dir: &Path) -> Self {
        Self {
            dir: metadata_dir.join("bad_query"),
        }
    }
}

#[async_trait]
impl BadQueryStore for FileBadQueryStore {
    async fn bad_queries_for_project(&self, project: &str) -> Result<BadQueryHistory> {
        validate_identifier("project", project)?;

        let path = self.dir.join(format!("{project}.json"));
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            // Nothing recorded yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BadQueryHistory::empty(project));
            }
            Err(e) => {
                return Err(AppError::Metadata(format!(
                    "Failed to read bad queries {}: {e}",
                    path.display()
                )));
            }
        };

        let entries: Vec<BadQueryEntry> = serde_json::from_slice(&raw).map_err(|e| {
            AppError::Metadata(format!("Invalid bad query history in {}: {e}", path.display()))
        })?;

        Ok(BadQueryHistory {
            project: project.to_string(),
            entries,
        })
    }
}
