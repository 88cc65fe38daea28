use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A job as recorded in cluster metadata. Only `project` matters for access checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInstance {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BadQueryEntry {
    /// Why the query was recorded, e.g. "Slowest" or "Pushdown".
    pub adj: String,
    pub sql: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    pub running_seconds: f64,
    pub server: String,
    pub thread: String,
    pub user: String,
    #[serde(default)]
    pub query_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BadQueryHistory {
    pub project: String,
    pub entries: Vec<BadQueryEntry>,
}

impl BadQueryHistory {
    pub fn empty(project: &str) -> Self {
        Self {
            project: project.to_string(),
            entries: Vec::new(),
        }
    }
}
