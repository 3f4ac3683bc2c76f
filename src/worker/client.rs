//! Worker RPC surface: the three calls a coordinator makes against a worker node.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;
use crate::task::{JobResult, JobSpec, JobState, JobType, TaskId};

/// Status carried by every worker reply. Code 0 means success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    pub code: i32,
    #[serde(default)]
    pub reason: String,
}

impl RpcStatus {
    pub fn success() -> Self {
        Self {
            code: 0,
            reason: String::new(),
        }
    }

    pub fn error(code: i32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Submit one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub cluster_id: String,
    pub task_id: TaskId,
    pub version: i64,
    pub job: JobSpec,
}

/// Poll a batch of jobs of one kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryJobsRequest {
    pub cluster_id: String,
    pub job_type: JobType,
    pub task_ids: Vec<TaskId>,
}

/// Worker-side view of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub task_id: TaskId,
    /// Assignment version the worker is running.
    pub version: i64,
    pub state: JobState,
    #[serde(default)]
    pub fail_reason: String,
    #[serde(default)]
    pub result: Option<JobResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryJobsResponse {
    pub status: RpcStatus,
    pub cluster_id: String,
    #[serde(default)]
    pub results: Vec<JobReport>,
}

/// Cancel and release a batch of jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropJobsRequest {
    pub cluster_id: String,
    pub job_type: JobType,
    pub task_ids: Vec<TaskId>,
}

/// RPC stub for one worker node.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn create_job(&self, request: CreateJobRequest) -> Result<RpcStatus, WorkerError>;

    async fn query_jobs(&self, request: QueryJobsRequest)
    -> Result<QueryJobsResponse, WorkerError>;

    async fn drop_jobs(&self, request: DropJobsRequest) -> Result<RpcStatus, WorkerError>;
}
