//! Playbook jobs: discovery, execution, dispatch and status records.

pub mod dispatcher;
pub mod executor;
pub mod models;
pub mod playbooks;
pub mod store;

pub use dispatcher::JobDispatcher;
pub use executor::{PlaybookExecutor, decode_summary};
pub use models::{
    FailureKind, JobDocument, JobFailure, JobId, JobOutcome, JobRecord, JobStatus, RunRequest,
};
pub use playbooks::{list_playbooks, validate_playbook_name};
pub use store::{JobStore, MemoryJobStore, spawn_sweeper};
