//! Job façade: submit, poll and cancel written once against the task record.
//!
//! Every call is bounded by the configured RPC timeout, and a rejecting
//! status is folded into `WorkerError::Rejected`, so callers only ever see
//! "it worked" or "it did not".

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::WorkerError;
use crate::task::{JobResult, JobState, JobType, NodeId, TaskId, TaskRecord};
use crate::worker::client::{
    CreateJobRequest, DropJobsRequest, JobReport, QueryJobsRequest, WorkerClient,
};

/// Issues worker RPCs for both job kinds.
#[derive(Debug, Clone)]
pub struct JobFacade {
    timeout: Duration,
}

impl JobFacade {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Submit the task's job, carrying its current version.
    pub async fn submit(
        &self,
        client: &dyn WorkerClient,
        node_id: NodeId,
        task: &TaskRecord,
    ) -> Result<(), WorkerError> {
        let request = CreateJobRequest {
            cluster_id: task.cluster_id.clone(),
            task_id: task.task_id,
            version: task.version,
            job: task.spec.clone(),
        };
        let status = self.bounded(node_id, client.create_job(request)).await?;
        if !status.is_success() {
            return Err(WorkerError::Rejected {
                node_id,
                reason: status.reason,
            });
        }
        debug!(task_id = task.task_id, node_id, version = task.version, "Job submitted");
        Ok(())
    }

    /// Poll a batch of jobs of one kind. Tasks the worker does not know are
    /// simply absent from the returned map.
    pub async fn poll(
        &self,
        client: &dyn WorkerClient,
        node_id: NodeId,
        cluster_id: &str,
        job_type: JobType,
        task_ids: &[TaskId],
    ) -> Result<HashMap<TaskId, JobReport>, WorkerError> {
        let request = QueryJobsRequest {
            cluster_id: cluster_id.to_string(),
            job_type,
            task_ids: task_ids.to_vec(),
        };
        let response = self.bounded(node_id, client.query_jobs(request)).await?;
        if !response.status.is_success() {
            return Err(WorkerError::Rejected {
                node_id,
                reason: response.status.reason,
            });
        }
        if !response.cluster_id.is_empty() && response.cluster_id != cluster_id {
            return Err(WorkerError::InvalidResponse {
                node_id,
                reason: format!(
                    "cluster id mismatch: expected {cluster_id}, got {}",
                    response.cluster_id
                ),
            });
        }

        Ok(response
            .results
            .into_iter()
            .filter(|report| task_ids.contains(&report.task_id))
            .map(|mut report| {
                report.result = if report.state == JobState::Finished {
                    normalize_result(job_type, report.result.take())
                } else {
                    None
                };
                (report.task_id, report)
            })
            .collect())
    }

    /// Cancel and release jobs on the worker.
    pub async fn cancel(
        &self,
        client: &dyn WorkerClient,
        node_id: NodeId,
        cluster_id: &str,
        job_type: JobType,
        task_ids: &[TaskId],
    ) -> Result<(), WorkerError> {
        let request = DropJobsRequest {
            cluster_id: cluster_id.to_string(),
            job_type,
            task_ids: task_ids.to_vec(),
        };
        let status = self.bounded(node_id, client.drop_jobs(request)).await?;
        if !status.is_success() {
            return Err(WorkerError::Rejected {
                node_id,
                reason: status.reason,
            });
        }
        Ok(())
    }

    async fn bounded<T>(
        &self,
        node_id: NodeId,
        call: impl Future<Output = Result<T, WorkerError>>,
    ) -> Result<T, WorkerError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| WorkerError::Timeout {
                node_id,
                timeout: self.timeout,
            })?
    }
}

/// Keep only a result of the polled kind; a kind without artifacts gets an empty one.
fn normalize_result(job_type: JobType, result: Option<JobResult>) -> Option<JobResult> {
    match result {
        Some(result) if result.job_type() == job_type => Some(result),
        _ => Some(JobResult::empty(job_type)),
    }
}
