//! Task scheduling.
//!
//! - `registry`: in-memory task records, guarded per update
//! - `transition`: one state-machine step per task state
//! - `reconcile`: startup load from the catalog
//! - `task_scheduler`: tick driver, lifecycle, caller-facing API

pub mod reconcile;
pub mod registry;
pub mod task_scheduler;
pub mod transition;

pub use registry::{TaskRegistry, TaskSummary};
pub use task_scheduler::TaskScheduler;
