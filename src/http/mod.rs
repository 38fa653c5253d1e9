//! HTTP surface over the job dispatcher and project tracker.

pub mod api;
pub mod server;

pub use api::{ApiError, AppState, SharedState, api_router};
pub use server::{build_router, build_state, start_server};
