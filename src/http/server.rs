use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState};
use crate::auth::TokenAuthorizer;
use crate::config::ControlConfig;
use crate::jobs::{JobDispatcher, JobStore, MemoryJobStore, PlaybookExecutor, spawn_sweeper};
use crate::projects::{DbHandle, GitSync, ProjectDb, ProjectTracker};

/// Build the full application router.
pub fn build_router(state: Arc<AppState>, permissive_cors: bool) -> Router {
    let mut app = api::api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if permissive_cors {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Wire the core services from configuration.
pub fn build_state(config: &ControlConfig) -> Result<AppState> {
    let db = ProjectDb::new(&config.paths.db_path).with_context(|| {
        format!(
            "Failed to initialize project database at {}",
            config.paths.db_path.display()
        )
    })?;
    let interrupted = db.reset_interrupted_syncs()?;
    if interrupted > 0 {
        tracing::warn!(interrupted, "Marked projects left syncing by a previous run as error");
    }
    std::fs::create_dir_all(&config.paths.projects_dir).with_context(|| {
        format!(
            "Failed to create projects directory {}",
            config.paths.projects_dir.display()
        )
    })?;

    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new(
        config.jobs.store_capacity,
        config.jobs.retention(),
    ));
    let executor = Arc::new(PlaybookExecutor::from_config(config));
    let dispatcher = JobDispatcher::start(
        store,
        executor,
        config.jobs.workers,
        config.jobs.queue_capacity,
    );
    let projects = ProjectTracker::new(
        DbHandle::new(db),
        GitSync::from_config(config),
        &config.paths.projects_dir,
    );

    Ok(AppState {
        dispatcher,
        projects,
        playbook_dir: config.paths.playbook_dir.clone(),
        authorizer: Arc::new(TokenAuthorizer::from_config(&config.auth)),
    })
}

/// Start the server and run until Ctrl+C.
pub async fn start_server(config: ControlConfig, permissive_cors: bool) -> Result<()> {
    let state = Arc::new(build_state(&config)?);
    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(
        state.dispatcher.store().clone(),
        config.jobs.sweep_interval(),
        cancel.clone(),
    );

    let app = build_router(state.clone(), permissive_cors);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        playbook_dir = %config.paths.playbook_dir.display(),
        "playctl listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    state.dispatcher.shutdown().await;
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Job sweeper task failed");
    }
    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutting down"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C; shutting down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_config(dir: &TempDir) -> ControlConfig {
        let mut config = ControlConfig::default();
        config.paths.playbook_dir = dir.path().join("ansible");
        config.paths.projects_dir = dir.path().join("state").join("projects");
        config.paths.db_path = dir.path().join("state").join("playctl.db");
        config
    }

    #[tokio::test]
    async fn test_build_state_creates_directories() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let state = build_state(&config).unwrap();
        assert!(config.paths.projects_dir.is_dir());
        assert!(config.paths.db_path.exists());
        state.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_build_state_clears_syncs_left_by_previous_run() {
        use crate::projects::{NewProject, ProjectStatus};

        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let id = {
            let db = ProjectDb::new(&config.paths.db_path).unwrap();
            let project = db
                .create_project(&NewProject {
                    name: "infra".into(),
                    description: None,
                    repo_url: "https://good.example/r.git".into(),
                    branch: "main".into(),
                })
                .unwrap();
            db.set_status(project.id, ProjectStatus::Syncing).unwrap();
            project.id
        };

        let state = build_state(&config).unwrap();
        let project = state.projects.get(id).await.unwrap();
        assert_eq!(project.status, ProjectStatus::Error);
        state.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_router_serves_health_with_layers() {
        let dir = TempDir::new().unwrap();
        let state = Arc::new(build_state(&test_config(&dir)).unwrap());
        let app = build_router(state, true);

        let request = Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let dir = TempDir::new().unwrap();
        let state = Arc::new(build_state(&test_config(&dir)).unwrap());
        let app = build_router(state, false);
        let request = Request::builder()
            .uri("/api/v1/nope")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
