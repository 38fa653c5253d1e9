//! Playbook discovery and name handling.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::errors::JobError;

pub const PLAYBOOK_EXTENSION: &str = "yml";

/// Names of the `*.yml` files directly inside `dir`, extension stripped,
/// sorted and duplicate-free. A directory that does not exist has no
/// playbooks.
pub fn list_playbooks(dir: &Path) -> Result<Vec<String>, JobError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(JobError::PlaybookDir {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let mut names = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|source| JobError::PlaybookDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(PLAYBOOK_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            names.insert(stem.to_string());
        }
    }
    Ok(names.into_iter().collect())
}

/// Reject names that could escape the playbook directory.
pub fn validate_playbook_name(name: &str) -> Result<(), JobError> {
    let invalid = |reason: &str| JobError::InvalidPlaybookName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.trim().is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(invalid("name contains a path separator"));
    }
    if name.contains("..") {
        return Err(invalid("name contains '..'"));
    }
    if name.contains('\0') {
        return Err(invalid("name contains a NUL byte"));
    }
    Ok(())
}

/// File name the runner is given for `name`.
pub fn playbook_file_name(name: &str) -> String {
    format!("{}.{}", name, PLAYBOOK_EXTENSION)
}

pub fn playbook_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(playbook_file_name(name))
}
