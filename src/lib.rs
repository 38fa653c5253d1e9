pub mod auth;
pub mod config;
pub mod errors;
pub mod http;
pub mod jobs;
pub mod logging;
pub mod projects;

#[cfg(test)]
pub(crate) mod test_support;
