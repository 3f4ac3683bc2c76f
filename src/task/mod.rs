//! Task model: the records the scheduler drives.
//!
//! - `state`: per-task state machine (Init → InProgress → Finished/Failed, with Retry)
//! - `model`: task records wrapping an analyze job or an index build

pub mod model;
pub mod state;

pub use model::{
    AnalyzeResult, AnalyzeSpec, IndexBuildResult, IndexBuildSpec, JobResult, JobSpec, JobType,
    NodeId, SegmentId, TaskId, TaskRecord, UniqueId,
};
pub use state::JobState;
