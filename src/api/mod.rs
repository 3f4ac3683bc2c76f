//! HTTP API for status reporting and task submission.

pub mod routes;

pub use routes::{AppState, coordinator_routes};
