use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use crate::auth::{Access, Authorizer, Denied, bearer_token};
use crate::errors::{JobError, SyncError};
use crate::jobs::{JobDispatcher, JobDocument, JobId, RunRequest, list_playbooks, validate_playbook_name};
use crate::projects::{NewProject, ProjectTracker, ProjectUpdate};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub dispatcher: JobDispatcher,
    pub projects: ProjectTracker,
    pub playbook_dir: PathBuf,
    pub authorizer: Arc<dyn Authorizer>,
}

pub type SharedState = Arc<AppState>;

// ── Response payload types ────────────────────────────────────────────

#[derive(Serialize)]
pub struct PlaybookList {
    pub playbooks: Vec<String>,
}

#[derive(Serialize)]
pub struct RunAccepted {
    pub job_id: JobId,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
    Unauthorized(String),
    Forbidden(String),
    Internal(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Conflict(msg)
            | ApiError::Unavailable(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::Internal(msg) => msg,
        };
        if status.is_server_error() {
            tracing::error!(code, error = %message, "Request failed");
        }
        (status, Json(serde_json::json!({"error": message, "code": code}))).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::PlaybookNotFound { .. } => ApiError::NotFound(err.to_string()),
            JobError::InvalidPlaybookName { .. } => ApiError::BadRequest(err.to_string()),
            JobError::QueueFull { .. } | JobError::StoreFull { .. } | JobError::DispatcherClosed => {
                ApiError::Unavailable(err.to_string())
            }
            JobError::RunInput(_) | JobError::PlaybookDir { .. } => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::ProjectNotFound { .. } => ApiError::NotFound(err.to_string()),
            SyncError::SyncInProgress { .. } => ApiError::Conflict(err.to_string()),
            SyncError::Invalid(_) => ApiError::BadRequest(err.to_string()),
            SyncError::WorkingCopy(_) | SyncError::Database(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<Denied> for ApiError {
    fn from(denied: Denied) -> Self {
        match denied {
            Denied::Unauthenticated => ApiError::Unauthorized("Missing or invalid token".into()),
            Denied::Forbidden => ApiError::Forbidden("Insufficient permissions".into()),
        }
    }
}

fn authorize(state: &AppState, headers: &HeaderMap, access: Access) -> Result<(), ApiError> {
    state
        .authorizer
        .authorize(bearer_token(headers), access)
        .map_err(ApiError::from)
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/playbooks", get(get_playbooks))
        .route("/api/v1/playbooks/{name}/run", post(run_playbook))
        .route("/api/v1/jobs/{id}", get(get_job))
        .route("/api/v1/projects", get(list_projects).post(create_project))
        .route(
            "/api/v1/projects/{id}",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/api/v1/projects/{id}/sync", post(sync_project))
        .route("/api/v1/projects/{id}/playbooks", get(get_project_playbooks))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn get_playbooks(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let dir = state.playbook_dir.clone();
    let playbooks = tokio::task::spawn_blocking(move || list_playbooks(&dir))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(PlaybookList { playbooks }))
}

/// The body is optional; an empty body runs with no inventory or extra vars.
async fn run_playbook(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers, Access::User)?;
    validate_playbook_name(&name)?;

    let mut request = if body.iter().all(u8::is_ascii_whitespace) {
        RunRequest::default()
    } else {
        serde_json::from_slice::<RunRequest>(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid run request: {}", e)))?
    };
    request.playbook = name;

    let job_id = state.dispatcher.run(request)?;
    Ok((StatusCode::ACCEPTED, Json(RunAccepted { job_id })))
}

async fn get_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let not_found = || ApiError::NotFound(format!("Job {} not found", id));
    let job_id: JobId = id.parse().map_err(|_| not_found())?;
    let record = state.dispatcher.get(&job_id).ok_or_else(not_found)?;
    Ok(Json(JobDocument::from(&record)))
}

async fn list_projects(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.projects.list().await?))
}

async fn create_project(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<NewProject>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers, Access::Admin)?;
    let project = state.projects.create(req).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.projects.get(id).await?))
}

async fn update_project(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<ProjectUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers, Access::Admin)?;
    Ok(Json(state.projects.update(id, req).await?))
}

async fn delete_project(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers, Access::Admin)?;
    Ok(Json(state.projects.delete(id).await?))
}

async fn sync_project(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers, Access::User)?;
    Ok(Json(state.projects.sync(id).await?))
}

async fn get_project_playbooks(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.projects.playbooks(id).await?))
}
