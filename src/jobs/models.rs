use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Opaque job identifier handed back to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Success,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Why a run ended in error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The named playbook file does not exist.
    NotFound,
    /// The runner exited non-zero.
    ExternalTool,
    /// The runner binary is not installed.
    EnvironmentUnavailable,
    /// Anything else: I/O while preparing inputs, a shut-down pool.
    Internal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub kind: FailureKind,
    /// For `ExternalTool` this is the captured stderr.
    pub message: String,
    pub stdout: Option<String>,
    pub returncode: Option<i32>,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stdout: None,
            returncode: None,
        }
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Success(Value),
    Error(JobFailure),
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Success(_) => JobStatus::Success,
            Self::Error(_) => JobStatus::Error,
        }
    }
}

/// One entry in the job store. Status and outcome are only ever replaced
/// together, under the store's lock.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub outcome: Option<JobOutcome>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn running(id: JobId) -> Self {
        Self {
            id,
            status: JobStatus::Running,
            outcome: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Wire shape of a job returned by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDocument {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returncode: Option<i32>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl From<&JobRecord> for JobDocument {
    fn from(record: &JobRecord) -> Self {
        let mut doc = JobDocument {
            job_id: record.id,
            status: record.status,
            result: None,
            error: None,
            error_kind: None,
            stdout: None,
            returncode: None,
            created_at: record.created_at.to_rfc3339(),
            completed_at: record.completed_at.map(|t| t.to_rfc3339()),
        };
        match &record.outcome {
            Some(JobOutcome::Success(value)) => doc.result = Some(value.clone()),
            Some(JobOutcome::Error(failure)) => {
                doc.error = Some(failure.message.clone());
                doc.error_kind = Some(failure.kind);
                doc.stdout = failure.stdout.clone();
                doc.returncode = failure.returncode;
            }
            None => {}
        }
        doc
    }
}

/// A playbook run waiting for a worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub playbook: String,
    /// Raw inventory text, written to a scoped temp file for the run.
    #[serde(default)]
    pub inventory: Option<String>,
    #[serde(default)]
    pub extra_vars: Option<Map<String, Value>>,
}

impl RunRequest {
    pub fn new(playbook: impl Into<String>) -> Self {
        Self {
            playbook: playbook.into(),
            ..Default::default()
        }
    }
}
