use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use super::models::{NewProject, Project, ProjectStatus, ProjectUpdate};

/// Async-safe handle to the project database.
///
/// Wraps `ProjectDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so SQLite I/O never ties up
/// async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ProjectDb>>,
}

impl DbHandle {
    pub fn new(db: ProjectDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ProjectDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct ProjectDb {
    conn: Connection,
}

const PROJECT_COLUMNS: &str =
    "id, name, description, repo_url, branch, status, created_at, updated_at, last_sync";

fn now() -> String {
    Utc::now().to_rfc3339()
}

impl ProjectDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    description TEXT,
                    repo_url TEXT NOT NULL,
                    branch TEXT NOT NULL DEFAULT 'main',
                    status TEXT NOT NULL DEFAULT 'active',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    last_sync TEXT
                );
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    pub fn create_project(&self, project: &NewProject) -> Result<Project> {
        let ts = now();
        self.conn
            .execute(
                "INSERT INTO projects (name, description, repo_url, branch, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    project.name,
                    project.description,
                    project.repo_url,
                    project.branch,
                    ProjectStatus::Active.as_str(),
                    ts
                ],
            )
            .context("Failed to insert project")?;
        let id = self.conn.last_insert_rowid();
        self.get_project(id)?
            .context("Project not found after insert")
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY id"))
            .context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map([], ProjectRow::from_row)
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row.context("Failed to read project row")?.into_project()?);
        }
        Ok(projects)
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
                params![id],
                ProjectRow::from_row,
            )
            .optional()
            .context("Failed to query project")?;
        row.map(ProjectRow::into_project).transpose()
    }

    /// Apply a partial update. Returns `None` when the project does not exist.
    pub fn update_project(&self, id: i64, update: &ProjectUpdate) -> Result<Option<Project>> {
        if self.get_project(id)?.is_none() {
            return Ok(None);
        }
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let ts = now();

        if let Some(name) = &update.name {
            tx.execute(
                "UPDATE projects SET name = ?1 WHERE id = ?2",
                params![name, id],
            )
            .context("Failed to update project name")?;
        }
        if let Some(description) = &update.description {
            tx.execute(
                "UPDATE projects SET description = ?1 WHERE id = ?2",
                params![description, id],
            )
            .context("Failed to update project description")?;
        }
        if let Some(repo_url) = &update.repo_url {
            tx.execute(
                "UPDATE projects SET repo_url = ?1 WHERE id = ?2",
                params![repo_url, id],
            )
            .context("Failed to update project repo_url")?;
        }
        if let Some(branch) = &update.branch {
            tx.execute(
                "UPDATE projects SET branch = ?1 WHERE id = ?2",
                params![branch, id],
            )
            .context("Failed to update project branch")?;
        }
        tx.execute(
            "UPDATE projects SET updated_at = ?1 WHERE id = ?2",
            params![ts, id],
        )
        .context("Failed to update project timestamp")?;

        tx.commit().context("Failed to commit project update")?;
        self.get_project(id)
    }

    /// Returns `false` when the project did not exist.
    pub fn delete_project(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])
            .context("Failed to delete project")?;
        Ok(deleted > 0)
    }

    /// Set the lifecycle status and bump `updated_at`.
    pub fn set_status(&self, id: i64, status: ProjectStatus) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE projects SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now(), id],
            )
            .context("Failed to update project status")?;
        Ok(changed > 0)
    }

    /// Record the end of a sync attempt: status, `updated_at` and
    /// `last_sync` all take the completion time.
    pub fn finish_sync(&self, id: i64, status: ProjectStatus) -> Result<Option<Project>> {
        let ts = now();
        let changed = self
            .conn
            .execute(
                "UPDATE projects SET status = ?1, updated_at = ?2, last_sync = ?2 WHERE id = ?3",
                params![status.as_str(), ts, id],
            )
            .context("Failed to record sync result")?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_project(id)
    }

    /// Move every project still marked `syncing` to `error`. Only called
    /// at startup, when no sync can be in flight.
    pub fn reset_interrupted_syncs(&self) -> Result<usize> {
        let changed = self
            .conn
            .execute(
                "UPDATE projects SET status = ?1, updated_at = ?2 WHERE status = ?3",
                params![
                    ProjectStatus::Error.as_str(),
                    now(),
                    ProjectStatus::Syncing.as_str()
                ],
            )
            .context("Failed to reset interrupted syncs")?;
        Ok(changed)
    }
}

// ── Internal row helpers ──────────────────────────────────────────────

/// Intermediate row struct for reading projects from SQLite before
/// converting the status string into its typed value.
struct ProjectRow {
    id: i64,
    name: String,
    description: Option<String>,
    repo_url: String,
    branch: String,
    status: String,
    created_at: String,
    updated_at: String,
    last_sync: Option<String>,
}

impl ProjectRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            repo_url: row.get(3)?,
            branch: row.get(4)?,
            status: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            last_sync: row.get(8)?,
        })
    }

    fn into_project(self) -> Result<Project> {
        let status = ProjectStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse project status")?;
        Ok(Project {
            id: self.id,
            name: self.name,
            description: self.description,
            repo_url: self.repo_url,
            branch: self.branch,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_sync: self.last_sync,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_project(name: &str) -> NewProject {
        NewProject {
            name: name.to_string(),
            description: None,
            repo_url: format!("https://example.com/{name}.git"),
            branch: "main".to_string(),
        }
    }

    #[test]
    fn test_create_and_get_project() {
        let db = ProjectDb::new_in_memory().unwrap();
        let project = db.create_project(&new_project("infra")).unwrap();
        assert_eq!(project.name, "infra");
        assert_eq!(project.status, ProjectStatus::Active);
        assert_eq!(project.created_at, project.updated_at);
        assert!(project.last_sync.is_none());

        let fetched = db.get_project(project.id).unwrap().unwrap();
        assert_eq!(fetched.repo_url, "https://example.com/infra.git");
    }

    #[test]
    fn test_get_missing_project_is_none() {
        let db = ProjectDb::new_in_memory().unwrap();
        assert!(db.get_project(99).unwrap().is_none());
    }

    #[test]
    fn test_list_projects_in_id_order() {
        let db = ProjectDb::new_in_memory().unwrap();
        db.create_project(&new_project("a")).unwrap();
        db.create_project(&new_project("b")).unwrap();
        let names: Vec<_> = db
            .list_projects()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_partial_update() {
        let db = ProjectDb::new_in_memory().unwrap();
        let project = db.create_project(&new_project("infra")).unwrap();
        let update = ProjectUpdate {
            branch: Some("release".into()),
            ..Default::default()
        };
        let updated = db.update_project(project.id, &update).unwrap().unwrap();
        assert_eq!(updated.branch, "release");
        assert_eq!(updated.name, "infra");
        assert!(db.update_project(42, &update).unwrap().is_none());
    }

    #[test]
    fn test_delete_project() {
        let db = ProjectDb::new_in_memory().unwrap();
        let project = db.create_project(&new_project("infra")).unwrap();
        assert!(db.delete_project(project.id).unwrap());
        assert!(!db.delete_project(project.id).unwrap());
        assert!(db.get_project(project.id).unwrap().is_none());
    }

    #[test]
    fn test_status_and_sync_bookkeeping() {
        let db = ProjectDb::new_in_memory().unwrap();
        let project = db.create_project(&new_project("infra")).unwrap();

        assert!(db.set_status(project.id, ProjectStatus::Syncing).unwrap());
        let syncing = db.get_project(project.id).unwrap().unwrap();
        assert_eq!(syncing.status, ProjectStatus::Syncing);
        assert!(syncing.last_sync.is_none());

        let done = db
            .finish_sync(project.id, ProjectStatus::Error)
            .unwrap()
            .unwrap();
        assert_eq!(done.status, ProjectStatus::Error);
        assert_eq!(done.last_sync.as_deref(), Some(done.updated_at.as_str()));

        assert!(!db.set_status(404, ProjectStatus::Active).unwrap());
        assert!(db.finish_sync(404, ProjectStatus::Active).unwrap().is_none());
    }

    #[test]
    fn test_reset_interrupted_syncs() {
        let db = ProjectDb::new_in_memory().unwrap();
        let stuck = db.create_project(&new_project("stuck")).unwrap();
        let idle = db.create_project(&new_project("idle")).unwrap();
        db.set_status(stuck.id, ProjectStatus::Syncing).unwrap();

        assert_eq!(db.reset_interrupted_syncs().unwrap(), 1);
        let stuck = db.get_project(stuck.id).unwrap().unwrap();
        assert_eq!(stuck.status, ProjectStatus::Error);
        assert!(stuck.last_sync.is_none());
        let idle = db.get_project(idle.id).unwrap().unwrap();
        assert_eq!(idle.status, ProjectStatus::Active);
        assert_eq!(db.reset_interrupted_syncs().unwrap(), 0);
    }

    #[test]
    fn test_file_database_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("playctl.db");
        let id = {
            let db = ProjectDb::new(&path).unwrap();
            db.create_project(&new_project("infra")).unwrap().id
        };
        let db = ProjectDb::new(&path).unwrap();
        assert!(db.get_project(id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_db_handle_runs_closures() {
        let handle = DbHandle::new(ProjectDb::new_in_memory().unwrap());
        let created = handle
            .call(|db| db.create_project(&new_project("infra")))
            .await
            .unwrap();
        let fetched = handle
            .call(move |db| db.get_project(created.id))
            .await
            .unwrap();
        assert!(fetched.is_some());
    }
}
