use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::access::ProjectPermission;
use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub diagnosis: DiagnosisConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiagnosisConfig {
    /// Installation home of the analytics cluster.
    pub home_dir: PathBuf,
    /// Script location, relative to `home_dir`.
    #[serde(default = "default_script")]
    pub script: PathBuf,
    #[serde(default = "default_archive_suffix")]
    pub archive_suffix: String,
    /// 0 disables the timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl DiagnosisConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: default_workspace_dir(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MetadataConfig {
    /// Defaults to `<diagnosis.home_dir>/metadata`.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AccessConfig {
    #[serde(default)]
    pub admins: Vec<String>,
    /// project -> user -> permission
    #[serde(default)]
    pub projects: HashMap<String, HashMap<String, ProjectPermission>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_user_header")]
    pub user_header: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_header: default_user_header(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7070
}

fn default_script() -> PathBuf {
    PathBuf::from("bin/diag.sh")
}

fn default_archive_suffix() -> String {
    ".zip".to_string()
}

fn default_timeout_secs() -> u64 {
    1800
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from("/tmp/cubediag-workspaces")
}

fn default_retention_secs() -> u64 {
    6 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    600
}

fn default_user_header() -> String {
    "x-remote-user".to_string()
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("cubediag").required(false));
        }

        // Environment variable overrides with CUBEDIAG_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("CUBEDIAG")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.diagnosis.script.is_absolute() {
            return Err(AppError::Config(format!(
                "diagnosis.script must be relative to diagnosis.home_dir, got {}",
                self.diagnosis.script.display()
            )));
        }
        if self.diagnosis.archive_suffix.is_empty() {
            return Err(AppError::Config(
                "diagnosis.archive_suffix must not be empty".to_string(),
            ));
        }
        if self.workspace.sweep_interval_secs == 0 {
            return Err(AppError::Config(
                "workspace.sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.metadata
            .dir
            .clone()
            .unwrap_or_else(|| self.diagnosis.home_dir.join("metadata"))
    }
}
