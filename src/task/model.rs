//! Task records: the scheduler's uniform view of one unit of remote work.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::state::JobState;

/// Globally unique identifier (task ids, build ids, segment ids, ...).
pub type UniqueId = i64;
pub type TaskId = UniqueId;
pub type NodeId = UniqueId;
pub type SegmentId = UniqueId;

/// Kind of remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Analyze,
    IndexBuild,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::IndexBuild => "index_build",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "analyze" => Some(Self::Analyze),
            "index_build" => Some(Self::IndexBuild),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Data-analysis job over a set of segments of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeSpec {
    pub collection_id: UniqueId,
    pub partition_id: UniqueId,
    pub field_id: UniqueId,
    pub segment_ids: Vec<SegmentId>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Index build over a single segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBuildSpec {
    pub collection_id: UniqueId,
    pub partition_id: UniqueId,
    pub segment_id: SegmentId,
    pub field_id: UniqueId,
    pub index_id: UniqueId,
    pub num_rows: i64,
    #[serde(default)]
    pub index_params: BTreeMap<String, String>,
}

/// Kind-specific payload of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobSpec {
    Analyze(AnalyzeSpec),
    IndexBuild(IndexBuildSpec),
}

impl JobSpec {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::Analyze(_) => JobType::Analyze,
            Self::IndexBuild(_) => JobType::IndexBuild,
        }
    }

    /// Segments whose existence this job depends on.
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        match self {
            Self::Analyze(spec) => spec.segment_ids.clone(),
            Self::IndexBuild(spec) => vec![spec.segment_id],
        }
    }

    pub fn references_segment(&self, segment_id: SegmentId) -> bool {
        match self {
            Self::Analyze(spec) => spec.segment_ids.contains(&segment_id),
            Self::IndexBuild(spec) => spec.segment_id == segment_id,
        }
    }
}

/// Artifacts produced by an analyze job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeResult {
    pub centroids_file: String,
    #[serde(default)]
    pub segment_offset_mapping_files: BTreeMap<SegmentId, String>,
}

/// Artifacts produced by an index build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBuildResult {
    pub index_file_keys: Vec<String>,
    pub serialized_size: u64,
    #[serde(default)]
    pub current_index_version: i32,
}

/// Kind-specific result payload, present only on `Finished` tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobResult {
    Analyze(AnalyzeResult),
    IndexBuild(IndexBuildResult),
}

impl JobResult {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::Analyze(_) => JobType::Analyze,
            Self::IndexBuild(_) => JobType::IndexBuild,
        }
    }

    /// Result carrying no artifacts.
    pub fn empty(job_type: JobType) -> Self {
        match job_type {
            JobType::Analyze => Self::Analyze(AnalyzeResult::default()),
            JobType::IndexBuild => Self::IndexBuild(IndexBuildResult::default()),
        }
    }
}

/// One schedulable unit of remote work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Global task id (build id for index builds).
    pub task_id: TaskId,
    /// Correlation token used to batch status polls.
    pub cluster_id: String,
    /// Current state.
    pub state: JobState,
    /// Worker currently owning the remote job.
    pub node_id: Option<NodeId>,
    /// Bumped on every (re)assignment.
    pub version: i64,
    /// Last error description.
    pub fail_reason: String,
    pub spec: JobSpec,
    pub result: Option<JobResult>,
    pub updated_at: DateTime<Utc>,
    /// In-memory state is ahead of the catalog.
    #[serde(skip)]
    pub dirty: bool,
}

impl TaskRecord {
    /// Create a fresh task in `Init`.
    pub fn new(task_id: TaskId, cluster_id: impl Into<String>, spec: JobSpec) -> Self {
        Self {
            task_id,
            cluster_id: cluster_id.into(),
            state: JobState::Init,
            node_id: None,
            version: 0,
            fail_reason: String::new(),
            spec,
            result: None,
            updated_at: Utc::now(),
            dirty: false,
        }
    }

    pub fn analyze(task_id: TaskId, cluster_id: impl Into<String>, spec: AnalyzeSpec) -> Self {
        Self::new(task_id, cluster_id, JobSpec::Analyze(spec))
    }

    pub fn index_build(
        build_id: TaskId,
        cluster_id: impl Into<String>,
        spec: IndexBuildSpec,
    ) -> Self {
        Self::new(build_id, cluster_id, JobSpec::IndexBuild(spec))
    }

    pub fn job_type(&self) -> JobType {
        self.spec.job_type()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to `state`, recording `reason` (cleared when empty).
    pub fn set_state(&mut self, state: JobState, reason: impl Into<String>) {
        if state != self.state && !self.state.can_transition_to(state) {
            tracing::warn!(
                task_id = self.task_id,
                from = %self.state,
                to = %state,
                "Unexpected task state transition"
            );
        }
        self.state = state;
        self.fail_reason = reason.into();
        self.updated_at = Utc::now();
    }

    /// Record a new assignment. Returns the previous `(node_id, version)`.
    pub fn assign(&mut self, node_id: NodeId) -> (Option<NodeId>, i64) {
        let previous = (self.node_id, self.version);
        self.node_id = Some(node_id);
        self.version += 1;
        self.updated_at = Utc::now();
        previous
    }

    /// Undo an assignment that was never made durable.
    pub fn revert_assignment(&mut self, previous: (Option<NodeId>, i64)) {
        self.node_id = previous.0;
        self.version = previous.1;
    }

    pub fn reset_node(&mut self) {
        self.node_id = None;
    }
}
