use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Syncing,
    Error,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Syncing => "syncing",
            Self::Error => "error",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "syncing" => Ok(Self::Syncing),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid project status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub repo_url: String,
    pub branch: String,
    pub status: ProjectStatus,
    pub created_at: String,
    pub updated_at: String,
    pub last_sync: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub repo_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl NewProject {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.repo_url.trim().is_empty() {
            return Err("repo_url must not be empty".to_string());
        }
        validate_branch(&self.branch)
    }
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

impl ProjectUpdate {
    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.name, Some(n) if n.trim().is_empty()) {
            return Err("name must not be empty".to_string());
        }
        if matches!(&self.repo_url, Some(u) if u.trim().is_empty()) {
            return Err("repo_url must not be empty".to_string());
        }
        match &self.branch {
            Some(b) => validate_branch(b),
            None => Ok(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.repo_url.is_none()
            && self.branch.is_none()
    }
}

// A leading '-' would be read by git as an option.
fn validate_branch(branch: &str) -> Result<(), String> {
    if branch.trim().is_empty() {
        return Err("branch must not be empty".to_string());
    }
    if branch.starts_with('-') {
        return Err("branch must not start with '-'".to_string());
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Clone,
    Pull,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clone => "clone",
            Self::Pull => "pull",
        }
    }
}

/// Result of one sync attempt as reported to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub project_id: i64,
    pub status: ProjectStatus,
    pub message: String,
    pub action: SyncAction,
    pub sync_started_at: String,
}
