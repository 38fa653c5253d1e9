//! Project lifecycle: CRUD, sync bookkeeping and working-copy cleanup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use super::db::DbHandle;
use super::git::{GitSync, SyncOutcome};
use super::models::{NewProject, Project, ProjectStatus, ProjectUpdate, SyncResponse};
use crate::errors::SyncError;
use crate::jobs::list_playbooks;

/// Per-project exclusion for operations that touch the working copy.
/// Contended acquisitions are rejected, not queued.
#[derive(Clone, Default)]
pub struct SyncLocks {
    held: Arc<Mutex<HashSet<i64>>>,
}

impl SyncLocks {
    pub fn try_acquire(&self, project_id: i64) -> Option<SyncGuard> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(project_id) {
            return None;
        }
        Some(SyncGuard {
            held: self.held.clone(),
            project_id,
        })
    }

    pub fn is_held(&self, project_id: i64) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&project_id)
    }
}

/// Releases the project's lock on drop.
pub struct SyncGuard {
    held: Arc<Mutex<HashSet<i64>>>,
    project_id: i64,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.project_id);
    }
}

/// An in-flight sync. Holds the project's lock until finished.
pub struct SyncTicket {
    pub project: Project,
    pub started_at: DateTime<Utc>,
    _guard: SyncGuard,
}

#[derive(Clone)]
pub struct ProjectTracker {
    db: DbHandle,
    git: GitSync,
    projects_dir: PathBuf,
    locks: SyncLocks,
}

impl ProjectTracker {
    pub fn new(db: DbHandle, git: GitSync, projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            git,
            projects_dir: projects_dir.into(),
            locks: SyncLocks::default(),
        }
    }

    pub fn locks(&self) -> &SyncLocks {
        &self.locks
    }

    /// Local working copy of a project.
    pub fn workdir(&self, project_id: i64) -> PathBuf {
        self.projects_dir.join(project_id.to_string())
    }

    pub async fn list(&self) -> Result<Vec<Project>, SyncError> {
        self.db
            .call(|db| db.list_projects())
            .await
            .map_err(SyncError::Database)
    }

    pub async fn get(&self, project_id: i64) -> Result<Project, SyncError> {
        self.db
            .call(move |db| db.get_project(project_id))
            .await
            .map_err(SyncError::Database)?
            .ok_or(SyncError::ProjectNotFound { id: project_id })
    }

    pub async fn create(&self, project: NewProject) -> Result<Project, SyncError> {
        project.validate().map_err(SyncError::Invalid)?;
        let created = self
            .db
            .call(move |db| db.create_project(&project))
            .await
            .map_err(SyncError::Database)?;
        tracing::info!(project_id = created.id, name = %created.name, "Project created");
        Ok(created)
    }

    /// Apply `update`. A changed remote or branch invalidates the working
    /// copy, so it is removed and the next sync clones afresh.
    pub async fn update(&self, project_id: i64, update: ProjectUpdate) -> Result<Project, SyncError> {
        update.validate().map_err(SyncError::Invalid)?;
        let existing = self.get(project_id).await?;
        let _guard = self.lock(project_id)?;

        let remote_changed = matches!(&update.repo_url, Some(u) if *u != existing.repo_url)
            || matches!(&update.branch, Some(b) if *b != existing.branch);
        let updated = self
            .db
            .call(move |db| db.update_project(project_id, &update))
            .await
            .map_err(SyncError::Database)?
            .ok_or(SyncError::ProjectNotFound { id: project_id })?;

        if remote_changed {
            remove_workdir(project_id, &self.workdir(project_id)).await;
        }
        Ok(updated)
    }

    /// Delete the project record and, best-effort, its working copy.
    pub async fn delete(&self, project_id: i64) -> Result<Project, SyncError> {
        let project = self.get(project_id).await?;
        let _guard = self.lock(project_id)?;

        let deleted = self
            .db
            .call(move |db| db.delete_project(project_id))
            .await
            .map_err(SyncError::Database)?;
        if !deleted {
            return Err(SyncError::ProjectNotFound { id: project_id });
        }
        remove_workdir(project_id, &self.workdir(project_id)).await;
        tracing::info!(project_id, "Project deleted");
        Ok(project)
    }

    /// Mark the project as syncing. Fails without side effects when the
    /// project is unknown or another sync holds its lock.
    pub async fn begin_sync(&self, project_id: i64) -> Result<SyncTicket, SyncError> {
        self.get(project_id).await?;
        let guard = self.lock(project_id)?;
        let started_at = Utc::now();

        let changed = self
            .db
            .call(move |db| db.set_status(project_id, ProjectStatus::Syncing))
            .await
            .map_err(SyncError::Database)?;
        if !changed {
            return Err(SyncError::ProjectNotFound { id: project_id });
        }
        let project = self.get(project_id).await?;
        Ok(SyncTicket {
            project,
            started_at,
            _guard: guard,
        })
    }

    /// Resolve the sync: active on success, error otherwise. `last_sync` is
    /// set either way. Consumes the ticket, releasing the lock.
    ///
    /// If the result cannot be recorded the project is still moved out of
    /// `syncing` before the error is returned.
    pub async fn finish_sync(
        &self,
        ticket: SyncTicket,
        outcome: &SyncOutcome,
    ) -> Result<Project, SyncError> {
        let project_id = ticket.project.id;
        let status = if outcome.success {
            ProjectStatus::Active
        } else {
            ProjectStatus::Error
        };
        let recorded = self
            .db
            .call(move |db| db.finish_sync(project_id, status))
            .await;
        let project = match recorded {
            Ok(project) => project.ok_or(SyncError::ProjectNotFound { id: project_id })?,
            Err(e) => {
                tracing::error!(project_id, error = %e, "Failed to record sync result");
                if let Err(reset_err) = self
                    .db
                    .call(move |db| db.set_status(project_id, ProjectStatus::Error))
                    .await
                {
                    tracing::error!(project_id, error = %reset_err, "Failed to mark project as errored");
                }
                return Err(SyncError::Database(e));
            }
        };
        drop(ticket);
        Ok(project)
    }

    /// Clone or pull the project's working copy and record the result.
    ///
    /// The attempt runs on its own task and always reaches its final status
    /// write, even when the caller stops waiting for it.
    pub async fn sync(&self, project_id: i64) -> Result<SyncResponse, SyncError> {
        let tracker = self.clone();
        tokio::spawn(async move { tracker.run_sync(project_id).await })
            .await
            .map_err(|e| SyncError::WorkingCopy(format!("Sync task failed: {}", e)))?
    }

    async fn run_sync(&self, project_id: i64) -> Result<SyncResponse, SyncError> {
        let ticket = self.begin_sync(project_id).await?;
        let started_at = ticket.started_at;
        tracing::info!(project_id, branch = %ticket.project.branch, "Sync started");

        let outcome = self
            .git
            .sync(
                &ticket.project.repo_url,
                &ticket.project.branch,
                &self.workdir(project_id),
            )
            .await;
        if outcome.success {
            tracing::info!(project_id, action = outcome.action.as_str(), "Sync succeeded");
        } else {
            tracing::warn!(project_id, action = outcome.action.as_str(), message = %outcome.message, "Sync failed");
        }

        let project = self.finish_sync(ticket, &outcome).await?;
        Ok(SyncResponse {
            project_id,
            status: project.status,
            message: outcome.message,
            action: outcome.action,
            sync_started_at: started_at.to_rfc3339(),
        })
    }

    /// Playbooks in the project's working copy; empty before the first sync.
    pub async fn playbooks(&self, project_id: i64) -> Result<Vec<String>, SyncError> {
        self.get(project_id).await?;
        let workdir = self.workdir(project_id);
        tokio::task::spawn_blocking(move || list_playbooks(&workdir))
            .await
            .map_err(|e| SyncError::WorkingCopy(e.to_string()))?
            .map_err(|e| SyncError::WorkingCopy(e.to_string()))
    }

    fn lock(&self, project_id: i64) -> Result<SyncGuard, SyncError> {
        self.locks
            .try_acquire(project_id)
            .ok_or(SyncError::SyncInProgress { id: project_id })
    }
}

async fn remove_workdir(project_id: i64, workdir: &Path) {
    match tokio::fs::remove_dir_all(workdir).await {
        Ok(()) => tracing::debug!(project_id, path = %workdir.display(), "Removed working copy"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            project_id,
            path = %workdir.display(),
            error = %e,
            "Failed to remove working copy"
        ),
    }
}
