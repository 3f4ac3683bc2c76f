//! Per-state transition functions.
//!
//! Every function takes the task as read from the tick snapshot and returns
//! the record to commit (or a removal). None of them touch the registry;
//! the caller applies the outcome under the registry's write lock.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{MetaError, WorkerError};
use crate::scheduler::registry::Outcome;
use crate::store::{MetaStore, SegmentMeta};
use crate::task::{JobResult, JobSpec, JobState, JobType, NodeId, TaskId, TaskRecord};
use crate::worker::{JobFacade, WorkerManager};

/// Collaborators a transition may call out to.
pub struct TransitionContext {
    pub meta: Arc<dyn MetaStore>,
    pub segments: Arc<dyn SegmentMeta>,
    pub workers: Arc<dyn WorkerManager>,
    pub facade: JobFacade,
    pub config: SchedulerConfig,
}

/// Tasks polled together in one `query_jobs` call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PollKey {
    pub node_id: Option<NodeId>,
    pub cluster_id: String,
    pub job_type: JobType,
}

impl PollKey {
    pub fn of(task: &TaskRecord) -> Self {
        Self {
            node_id: task.node_id,
            cluster_id: task.cluster_id.clone(),
            job_type: task.job_type(),
        }
    }
}

impl TransitionContext {
    /// Write a record to the catalog, bounded by the RPC timeout.
    pub async fn persist(&self, task: &TaskRecord) -> Result<(), MetaError> {
        let timeout = self.config.rpc_timeout;
        tokio::time::timeout(timeout, self.meta.save_task(task))
            .await
            .map_err(|_| MetaError::Timeout(timeout))?
    }

    /// Best-effort catalog delete for a task whose segment is gone.
    pub async fn forget(&self, task_id: TaskId) {
        let timeout = self.config.rpc_timeout;
        let result = tokio::time::timeout(timeout, self.meta.delete_task(task_id))
            .await
            .map_err(|_| MetaError::Timeout(timeout))
            .and_then(|r| r);
        if let Err(e) = result {
            warn!(task_id, error = %e, "Failed to delete task record");
        }
    }

    /// `true` when every segment the task depends on still exists.
    pub fn segments_healthy(&self, task: &TaskRecord) -> bool {
        task.spec
            .segment_ids()
            .into_iter()
            .all(|segment_id| self.segments.is_segment_healthy(segment_id))
    }

    /// Index builds over tiny segments complete without a worker.
    fn skips_remote_build(&self, task: &TaskRecord) -> bool {
        matches!(
            &task.spec,
            JobSpec::IndexBuild(spec) if spec.num_rows < self.config.min_segment_rows_to_index
        )
    }

    /// `Init`: assign, persist, submit, persist.
    pub async fn process_init(&self, mut task: TaskRecord) -> Outcome {
        if self.skips_remote_build(&task) {
            let mut finished = task.clone();
            finished.set_state(JobState::Finished, "");
            finished.result = Some(JobResult::empty(JobType::IndexBuild));
            if let Err(e) = self.persist(&finished).await {
                warn!(task_id = task.task_id, error = %e, "Failed to persist small-segment build");
                return Outcome::Update(task);
            }
            info!(task_id = task.task_id, "Segment too small to index, build finished");
            return Outcome::Update(finished);
        }

        let Some((node_id, client)) = self.workers.pick_client() else {
            debug!(task_id = task.task_id, "No worker available");
            return Outcome::Update(task);
        };

        let previous = task.assign(node_id);
        if let Err(e) = self.persist(&task).await {
            warn!(task_id = task.task_id, node_id, error = %e, "Failed to persist assignment");
            task.revert_assignment(previous);
            return Outcome::Update(task);
        }

        if let Err(e) = self.facade.submit(client.as_ref(), node_id, &task).await {
            warn!(task_id = task.task_id, node_id, error = %e, "Job submission failed");
            task.reset_node();
            task.fail_reason = e.to_string();
            return Outcome::Update(task);
        }

        if !self.segments_healthy(&task) {
            info!(task_id = task.task_id, node_id, "Segment dropped during submission, task removed");
            self.forget(task.task_id).await;
            return Outcome::Remove;
        }

        task.set_state(JobState::InProgress, "");
        if let Err(e) = self.persist(&task).await {
            warn!(
                task_id = task.task_id,
                node_id,
                error = %e,
                "Job submitted but state not persisted, scheduling cancel"
            );
            task.set_state(JobState::Retry, format!("persist after submit failed: {e}"));
            return Outcome::Update(task);
        }

        info!(
            task_id = task.task_id,
            node_id,
            version = task.version,
            job_type = %task.job_type(),
            "Task assigned"
        );
        Outcome::Update(task)
    }

    /// `InProgress`: one status poll for a batch sharing a [`PollKey`].
    pub async fn process_in_progress(
        &self,
        key: &PollKey,
        tasks: Vec<TaskRecord>,
    ) -> Vec<(TaskId, Outcome)> {
        let ids: Vec<TaskId> = tasks.iter().map(|t| t.task_id).collect();

        let reports = match self.poll(key, &ids).await {
            Ok(reports) => reports,
            Err(e) => {
                warn!(node_id = ?key.node_id, tasks = ids.len(), error = %e, "Status poll failed");
                let reason = e.to_string();
                return tasks
                    .into_iter()
                    .map(|mut task| {
                        task.set_state(JobState::Retry, reason.clone());
                        (task.task_id, Outcome::Update(task))
                    })
                    .collect();
            }
        };

        let mut outcomes = Vec::with_capacity(tasks.len());
        for mut task in tasks {
            let task_id = task.task_id;
            if !self.segments_healthy(&task) {
                info!(task_id, "Segment dropped during status poll, task removed");
                self.forget(task_id).await;
                outcomes.push((task_id, Outcome::Remove));
                continue;
            }
            match reports.get(&task_id) {
                None => {
                    task.set_state(JobState::Retry, "job not found on worker");
                }
                Some(report) if report.version != task.version => {
                    task.set_state(
                        JobState::Retry,
                        format!(
                            "worker runs version {}, expected {}",
                            report.version, task.version
                        ),
                    );
                }
                Some(report) => match report.state {
                    JobState::Init | JobState::InProgress => {}
                    JobState::Retry | JobState::None => {
                        task.set_state(JobState::Retry, report.fail_reason.clone());
                    }
                    JobState::Finished => {
                        task.set_state(JobState::Finished, "");
                        task.result = report.result.clone();
                        self.persist_terminal(&mut task).await;
                    }
                    JobState::Failed => {
                        task.set_state(JobState::Failed, report.fail_reason.clone());
                        self.persist_terminal(&mut task).await;
                    }
                },
            }
            if task.state != JobState::InProgress {
                info!(task_id, state = %task.state, reason = %task.fail_reason, "Task left in-progress");
            }
            outcomes.push((task_id, Outcome::Update(task)));
        }
        outcomes
    }

    async fn poll(
        &self,
        key: &PollKey,
        ids: &[TaskId],
    ) -> Result<HashMap<TaskId, crate::worker::JobReport>, WorkerError> {
        let node_id = key.node_id.unwrap_or_default();
        let client = key
            .node_id
            .and_then(|id| self.workers.get_client_by_id(id))
            .ok_or(WorkerError::NodeNotFound { node_id })?;
        self.facade
            .poll(client.as_ref(), node_id, &key.cluster_id, key.job_type, ids)
            .await
    }

    /// Record a terminal outcome; on failure keep it in memory, marked dirty.
    async fn persist_terminal(&self, task: &mut TaskRecord) {
        match self.persist(task).await {
            Ok(()) => task.dirty = false,
            Err(e) => {
                warn!(task_id = task.task_id, state = %task.state, error = %e, "Failed to persist terminal state");
                task.dirty = true;
            }
        }
    }

    /// `Retry`: cancel the remote job, then return to `Init`.
    pub async fn process_retry(&self, mut task: TaskRecord) -> Outcome {
        if let Err(e) = self.release(&task).await {
            warn!(task_id = task.task_id, node_id = ?task.node_id, error = %e, "Cancel failed, staying in retry");
            return Outcome::Update(task);
        }
        let reason = std::mem::take(&mut task.fail_reason);
        task.reset_node();
        task.set_state(JobState::Init, reason);
        debug!(task_id = task.task_id, "Task reset for reassignment");
        Outcome::Update(task)
    }

    /// `Finished`/`Failed`: make the outcome durable, release the worker, drop the task.
    pub async fn process_terminal(&self, mut task: TaskRecord) -> Outcome {
        if task.dirty {
            self.persist_terminal(&mut task).await;
            if task.dirty {
                return Outcome::Update(task);
            }
        }
        if let Err(e) = self.release(&task).await {
            warn!(task_id = task.task_id, node_id = ?task.node_id, error = %e, "Cleanup failed, will retry");
            return Outcome::Update(task);
        }
        info!(task_id = task.task_id, state = %task.state, "Task completed and cleaned up");
        Outcome::Remove
    }

    /// Cancel the task's job on its worker. A task never assigned, or whose
    /// worker has left the cluster, has nothing to release.
    async fn release(&self, task: &TaskRecord) -> Result<(), WorkerError> {
        let Some(node_id) = task.node_id else {
            return Ok(());
        };
        let Some(client) = self.workers.get_client_by_id(node_id) else {
            debug!(task_id = task.task_id, node_id, "Worker gone, nothing to cancel");
            return Ok(());
        };
        self.facade
            .cancel(
                client.as_ref(),
                node_id,
                &task.cluster_id,
                task.job_type(),
                &[task.task_id],
            )
            .await
    }
}
