//! Managed projects and their git-backed working copies.

pub mod db;
pub mod git;
pub mod models;
pub mod tracker;

pub use db::{DbHandle, ProjectDb};
pub use git::{GitSync, SyncOutcome};
pub use models::{NewProject, Project, ProjectStatus, ProjectUpdate, SyncAction, SyncResponse};
pub use tracker::{ProjectTracker, SyncGuard, SyncLocks, SyncTicket};
