//! Test doubles for the scheduler's collaborators.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{MetaError, WorkerError};
use crate::store::MetaStore;
use crate::task::{
    AnalyzeSpec, IndexBuildSpec, JobResult, JobState, SegmentId, TaskId, TaskRecord,
};
use crate::worker::client::{
    CreateJobRequest, DropJobsRequest, JobReport, QueryJobsRequest, QueryJobsResponse, RpcStatus,
    WorkerClient,
};

/// A call observed by [`MockWorker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCall {
    Create { task_id: TaskId, version: i64 },
    Query { task_ids: Vec<TaskId> },
    Drop { task_ids: Vec<TaskId> },
}

#[derive(Default)]
struct WorkerState {
    jobs: HashMap<TaskId, i64>,
    calls: Vec<WorkerCall>,
    reject_creates: usize,
    fail_queries: usize,
    fail_drops: usize,
    report_state: Option<JobState>,
    report_fail_reason: String,
    report_result: Option<JobResult>,
    version_offset: i64,
    delay: Duration,
}

/// Scriptable worker node. Accepts jobs and reports them `InProgress` until
/// told otherwise.
#[derive(Default)]
pub struct MockWorker {
    state: Mutex<WorkerState>,
}

impl MockWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` submissions with a failing status.
    pub fn reject_creates(&self, n: usize) {
        self.state.lock().unwrap().reject_creates = n;
    }

    /// Fail the next `n` status polls.
    pub fn fail_queries(&self, n: usize) {
        self.state.lock().unwrap().fail_queries = n;
    }

    /// Fail the next `n` cancellations.
    pub fn fail_drops(&self, n: usize) {
        self.state.lock().unwrap().fail_drops = n;
    }

    /// What polls report for known jobs from now on.
    pub fn report(&self, state: JobState, fail_reason: &str, result: Option<JobResult>) {
        let mut s = self.state.lock().unwrap();
        s.report_state = Some(state);
        s.report_fail_reason = fail_reason.to_string();
        s.report_result = result;
    }

    /// Report versions shifted by `offset` (simulates a superseded assignment).
    pub fn report_version_offset(&self, offset: i64) {
        self.state.lock().unwrap().version_offset = offset;
    }

    /// Lose every job (simulates a worker restart).
    pub fn forget_jobs(&self) {
        self.state.lock().unwrap().jobs.clear();
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = delay;
    }

    pub fn calls(&self) -> Vec<WorkerCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_drops(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, WorkerCall::Drop { .. }))
            .count()
    }

    pub fn count_creates(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, WorkerCall::Create { .. }))
            .count()
    }

    pub fn count_queries(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, WorkerCall::Query { .. }))
            .count()
    }

    pub fn has_job(&self, task_id: TaskId) -> bool {
        self.state.lock().unwrap().jobs.contains_key(&task_id)
    }

    async fn pause(&self) {
        let delay = self.state.lock().unwrap().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl WorkerClient for MockWorker {
    async fn create_job(&self, request: CreateJobRequest) -> Result<RpcStatus, WorkerError> {
        self.pause().await;
        let mut s = self.state.lock().unwrap();
        s.calls.push(WorkerCall::Create {
            task_id: request.task_id,
            version: request.version,
        });
        if s.reject_creates > 0 {
            s.reject_creates -= 1;
            return Ok(RpcStatus::error(65535, "mock error"));
        }
        s.jobs.insert(request.task_id, request.version);
        Ok(RpcStatus::success())
    }

    async fn query_jobs(
        &self,
        request: QueryJobsRequest,
    ) -> Result<QueryJobsResponse, WorkerError> {
        self.pause().await;
        let mut s = self.state.lock().unwrap();
        s.calls.push(WorkerCall::Query {
            task_ids: request.task_ids.clone(),
        });
        if s.fail_queries > 0 {
            s.fail_queries -= 1;
            return Ok(QueryJobsResponse {
                status: RpcStatus::error(1, "query job failed"),
                cluster_id: request.cluster_id,
                results: Vec::new(),
            });
        }

        let state = s.report_state.unwrap_or(JobState::InProgress);
        let results = request
            .task_ids
            .iter()
            .filter_map(|id| s.jobs.get(id).map(|version| (*id, *version)))
            .map(|(task_id, version)| JobReport {
                task_id,
                version: version + s.version_offset,
                state,
                fail_reason: s.report_fail_reason.clone(),
                result: s.report_result.clone(),
            })
            .collect();

        Ok(QueryJobsResponse {
            status: RpcStatus::success(),
            cluster_id: request.cluster_id,
            results,
        })
    }

    async fn drop_jobs(&self, request: DropJobsRequest) -> Result<RpcStatus, WorkerError> {
        self.pause().await;
        let mut s = self.state.lock().unwrap();
        s.calls.push(WorkerCall::Drop {
            task_ids: request.task_ids.clone(),
        });
        if s.fail_drops > 0 {
            s.fail_drops -= 1;
            return Err(WorkerError::Transport {
                node_id: 0,
                reason: "drop job failed".to_string(),
            });
        }
        for id in &request.task_ids {
            s.jobs.remove(id);
        }
        Ok(RpcStatus::success())
    }
}

/// In-memory catalog with injectable save failures.
#[derive(Default)]
pub struct MockMetaStore {
    records: Mutex<HashMap<TaskId, TaskRecord>>,
    fail_saves: AtomicUsize,
    fail_state: Mutex<Option<(JobState, usize)>>,
    saves: AtomicUsize,
    deletes: Mutex<Vec<TaskId>>,
}

impl MockMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<TaskRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.lock().unwrap();
            for record in records {
                map.insert(record.task_id, record);
            }
        }
        store
    }

    /// Fail the next `n` saves.
    pub fn fail_saves(&self, n: usize) {
        self.fail_saves.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` saves of records in `state`.
    pub fn fail_saves_in_state(&self, state: JobState, n: usize) {
        *self.fail_state.lock().unwrap() = Some((state, n));
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn record(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.records.lock().unwrap().get(&task_id).cloned()
    }

    pub fn deleted(&self) -> Vec<TaskId> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetaStore for MockMetaStore {
    async fn load_all_tasks(&self) -> Result<Vec<TaskRecord>, MetaError> {
        let mut records: Vec<TaskRecord> = self.records.lock().unwrap().values().cloned().collect();
        records.sort_by_key(|r| r.task_id);
        Ok(records)
    }

    async fn save_task(&self, record: &TaskRecord) -> Result<(), MetaError> {
        let pending = self.fail_saves.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_saves.store(pending - 1, Ordering::SeqCst);
            return Err(MetaError::Query("catalog save failed".to_string()));
        }
        {
            let mut fail_state = self.fail_state.lock().unwrap();
            if let Some((state, remaining)) = fail_state.as_mut() {
                if *state == record.state && *remaining > 0 {
                    *remaining -= 1;
                    return Err(MetaError::Query("catalog save failed".to_string()));
                }
            }
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        let mut stored = record.clone();
        stored.dirty = false;
        self.records.lock().unwrap().insert(record.task_id, stored);
        Ok(())
    }

    async fn delete_task(&self, task_id: TaskId) -> Result<(), MetaError> {
        self.records.lock().unwrap().remove(&task_id);
        self.deletes.lock().unwrap().push(task_id);
        Ok(())
    }
}

pub fn analyze_task(task_id: TaskId, segment_ids: Vec<SegmentId>) -> TaskRecord {
    TaskRecord::analyze(
        task_id,
        "by-dev",
        AnalyzeSpec {
            collection_id: 10000,
            partition_id: 10001,
            field_id: 10002,
            segment_ids,
            params: BTreeMap::new(),
        },
    )
}

pub fn index_task(build_id: TaskId, segment_id: SegmentId, num_rows: i64) -> TaskRecord {
    TaskRecord::index_build(
        build_id,
        "by-dev",
        IndexBuildSpec {
            collection_id: 100,
            partition_id: 200,
            segment_id,
            field_id: 400,
            index_id: 300,
            num_rows,
            index_params: BTreeMap::new(),
        },
    )
}
