//! Layered configuration for playctl.
//!
//! Settings are resolved in order: built-in defaults → `playctl.toml` →
//! `PLAYCTL_*` environment variables (a `.env` file is honoured by `main`)
//! → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//!
//! [paths]
//! playbook_dir = "./ansible"
//! projects_dir = "./.playctl/projects"
//! db_path = "./.playctl/playctl.db"
//!
//! [tools]
//! runner_cmd = "ansible-runner"
//! git_cmd = "git"
//!
//! [jobs]
//! workers = 4
//! queue_capacity = 64
//! store_capacity = 1024
//! retention_secs = 3600
//! sweep_interval_secs = 60
//!
//! [sync]
//! clone_timeout_secs = 120
//! pull_timeout_secs = 60
//!
//! [auth]
//! admin_token = "change-me"
//!
//! [logging]
//! format = "pretty"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Default file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "playctl.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Filesystem locations consumed by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsSection {
    /// Managed playbook directory (`<name>.yml` files).
    #[serde(default = "default_playbook_dir")]
    pub playbook_dir: PathBuf,
    /// Parent of the per-project working copies (`<projects_dir>/<id>`).
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
    /// SQLite database holding project metadata.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_playbook_dir() -> PathBuf {
    PathBuf::from("./ansible")
}

fn default_projects_dir() -> PathBuf {
    PathBuf::from("./.playctl/projects")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./.playctl/playctl.db")
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            playbook_dir: default_playbook_dir(),
            projects_dir: default_projects_dir(),
            db_path: default_db_path(),
        }
    }
}

/// External binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_runner_cmd")]
    pub runner_cmd: String,
    /// Extra arguments placed before the generated runner arguments.
    #[serde(default)]
    pub runner_args: Vec<String>,
    #[serde(default = "default_git_cmd")]
    pub git_cmd: String,
}

fn default_runner_cmd() -> String {
    "ansible-runner".to_string()
}

fn default_git_cmd() -> String {
    "git".to_string()
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            runner_cmd: default_runner_cmd(),
            runner_args: Vec::new(),
            git_cmd: default_git_cmd(),
        }
    }
}

/// Worker pool and job store sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsSection {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_store_capacity")]
    pub store_capacity: usize,
    /// How long a finished job stays pollable.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_store_capacity() -> usize {
    1024
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            store_capacity: default_store_capacity(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl JobsSection {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Git operation ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    #[serde(default = "default_clone_timeout_secs")]
    pub clone_timeout_secs: u64,
    #[serde(default = "default_pull_timeout_secs")]
    pub pull_timeout_secs: u64,
}

fn default_clone_timeout_secs() -> u64 {
    120
}

fn default_pull_timeout_secs() -> u64 {
    60
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            clone_timeout_secs: default_clone_timeout_secs(),
            pull_timeout_secs: default_pull_timeout_secs(),
        }
    }
}

impl SyncSection {
    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }
}

/// Bearer tokens for the authorization capability. With neither set, every
/// caller is authorized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSection {
    #[serde(default)]
    pub admin_token: Option<String>,
    #[serde(default)]
    pub user_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
    /// When set, logs are also written to a daily-rotated file here.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// The complete playctl.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub jobs: JobsSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ControlConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from(DEFAULT_CONFIG_FILE),
            source,
        })
    }

    /// Resolve file and environment layers.
    ///
    /// An explicit path must exist; otherwise `playctl.toml` in the working
    /// directory is used when present, and defaults when not.
    pub fn load_layered(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::load(local)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `PLAYCTL_*` overrides using the given lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PLAYCTL_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("PLAYCTL_PORT") {
            self.server.port = parse_env("PLAYCTL_PORT", &v)?;
        }
        if let Some(v) = lookup("PLAYCTL_PLAYBOOK_DIR") {
            self.paths.playbook_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PLAYCTL_PROJECTS_DIR") {
            self.paths.projects_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PLAYCTL_DB_PATH") {
            self.paths.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PLAYCTL_RUNNER_CMD") {
            self.tools.runner_cmd = v;
        }
        if let Some(v) = lookup("PLAYCTL_GIT_CMD") {
            self.tools.git_cmd = v;
        }
        if let Some(v) = lookup("PLAYCTL_WORKERS") {
            self.jobs.workers = parse_env("PLAYCTL_WORKERS", &v)?;
        }
        if let Some(v) = lookup("PLAYCTL_QUEUE_CAPACITY") {
            self.jobs.queue_capacity = parse_env("PLAYCTL_QUEUE_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("PLAYCTL_CLONE_TIMEOUT_SECS") {
            self.sync.clone_timeout_secs = parse_env("PLAYCTL_CLONE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("PLAYCTL_PULL_TIMEOUT_SECS") {
            self.sync.pull_timeout_secs = parse_env("PLAYCTL_PULL_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("PLAYCTL_ADMIN_TOKEN") {
            self.auth.admin_token = Some(v).filter(|t| !t.is_empty());
        }
        if let Some(v) = lookup("PLAYCTL_USER_TOKEN") {
            self.auth.user_token = Some(v).filter(|t| !t.is_empty());
        }
        if let Some(v) = lookup("PLAYCTL_LOG_FORMAT") {
            self.logging.format = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PLAYCTL_LOG_FORMAT".to_string(),
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("PLAYCTL_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Serialize the effective configuration, used by `playctl config`.
    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.jobs.workers == 0 {
            warnings.push("jobs.workers is 0: accepted runs will never start".to_string());
        }
        if self.jobs.queue_capacity == 0 {
            warnings.push("jobs.queue_capacity is 0: every run will be rejected".to_string());
        }
        if self.jobs.store_capacity < self.jobs.queue_capacity {
            warnings.push(format!(
                "jobs.store_capacity ({}) is smaller than jobs.queue_capacity ({})",
                self.jobs.store_capacity, self.jobs.queue_capacity
            ));
        }
        if self.sync.clone_timeout_secs == 0 {
            warnings.push("sync.clone_timeout_secs is 0: every clone will time out".to_string());
        }
        if self.sync.pull_timeout_secs == 0 {
            warnings.push("sync.pull_timeout_secs is 0: every pull will time out".to_string());
        }
        if !self.paths.playbook_dir.is_dir() {
            warnings.push(format!(
                "paths.playbook_dir {} does not exist",
                self.paths.playbook_dir.display()
            ));
        }
        warnings
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
