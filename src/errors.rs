//! Typed error hierarchy for playctl.
//!
//! Three top-level enums cover the three failure surfaces:
//! - `JobError`: playbook dispatch failures reported synchronously to the caller
//! - `SyncError`: project lookup and sync admission failures
//! - `ConfigError`: configuration loading failures
//!
//! Failures that happen *inside* a background run (runner exit codes, git
//! timeouts, missing binaries) are not errors here: they are recorded as
//! terminal outcomes and observed by polling.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while accepting or preparing a playbook run.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Playbook {name}.yml not found")]
    PlaybookNotFound { name: String },

    #[error("Invalid playbook name '{name}': {reason}")]
    InvalidPlaybookName { name: String, reason: String },

    #[error("Job queue is full ({capacity} runs pending)")]
    QueueFull { capacity: usize },

    #[error("Job store is full ({capacity} jobs still running)")]
    StoreFull { capacity: usize },

    #[error("Job dispatcher is shut down")]
    DispatcherClosed,

    #[error("Failed to prepare run input file: {0}")]
    RunInput(#[source] std::io::Error),

    #[error("Failed to read playbook directory {path}: {source}")]
    PlaybookDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from project sync and project lifecycle operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Project {id} not found")]
    ProjectNotFound { id: i64 },

    #[error("Sync already in progress for project {id}")]
    SyncInProgress { id: i64 },

    #[error("Invalid project: {0}")]
    Invalid(String),

    #[error("Working copy error: {0}")]
    WorkingCopy(String),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

/// Errors from loading the layered configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playbook_not_found_names_the_file() {
        let err = JobError::PlaybookNotFound {
            name: "missing-playbook".to_string(),
        };
        assert_eq!(err.to_string(), "Playbook missing-playbook.yml not found");
    }

    #[test]
    fn queue_full_carries_capacity() {
        let err = JobError::QueueFull { capacity: 8 };
        match &err {
            JobError::QueueFull { capacity } => assert_eq!(*capacity, 8),
            _ => panic!("Expected QueueFull"),
        }
        assert!(err.to_string().contains('8'));
    }

    #[test]
    fn sync_error_project_not_found_carries_id() {
        let err = SyncError::ProjectNotFound { id: 42 };
        assert!(matches!(err, SyncError::ProjectNotFound { id: 42 }));
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn sync_error_variants_are_distinct() {
        let busy = SyncError::SyncInProgress { id: 1 };
        let missing = SyncError::ProjectNotFound { id: 1 };
        assert!(matches!(busy, SyncError::SyncInProgress { .. }));
        assert!(!matches!(missing, SyncError::SyncInProgress { .. }));
    }

    #[test]
    fn config_error_invalid_value_is_descriptive() {
        let err = ConfigError::InvalidValue {
            key: "PLAYCTL_PORT".to_string(),
            value: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid value 'abc' for PLAYCTL_PORT");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&JobError::DispatcherClosed);
        assert_std_error(&SyncError::SyncInProgress { id: 3 });
        assert_std_error(&ConfigError::InvalidValue {
            key: "k".into(),
            value: "v".into(),
        });
    }
}
