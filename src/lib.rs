//! Index coordinator: schedules index-build and analyze jobs on remote workers.

pub mod api;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
