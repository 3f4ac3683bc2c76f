//! End-to-end tests: coordinator API + scheduler + HTTP worker client.
//!
//! Each test spins up a stub worker and the coordinator API on random
//! ports and drives them over real HTTP.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{Json, Router, extract::State, routing::post};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use index_coord::api::coordinator_routes;
use index_coord::config::SchedulerConfig;
use index_coord::scheduler::TaskScheduler;
use index_coord::store::{LibSqlMetaStore, MetaStore, SegmentRegistry};
use index_coord::task::{JobState, TaskRecord};
use index_coord::worker::{HttpWorkerClient, StaticWorkerManager};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stub worker: accepts every job and reports it finished on the first poll.
#[derive(Clone, Default)]
struct StubWorker {
    jobs: Arc<Mutex<HashMap<i64, i64>>>,
    dropped: Arc<Mutex<Vec<i64>>>,
}

async fn create(State(worker): State<StubWorker>, Json(body): Json<Value>) -> Json<Value> {
    let task_id = body["task_id"].as_i64().unwrap_or_default();
    let version = body["version"].as_i64().unwrap_or_default();
    worker.jobs.lock().unwrap().insert(task_id, version);
    Json(json!({"code": 0, "reason": ""}))
}

async fn query(State(worker): State<StubWorker>, Json(body): Json<Value>) -> Json<Value> {
    let job_type = body["job_type"].as_str().unwrap_or_default().to_string();
    let jobs = worker.jobs.lock().unwrap().clone();
    let results: Vec<Value> = body["task_ids"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|id| id.as_i64())
        .filter_map(|id| jobs.get(&id).map(|version| (id, *version)))
        .map(|(task_id, version)| {
            let result = if job_type == "index_build" {
                json!({"kind": "index_build", "index_file_keys": ["key-1"], "serialized_size": 512})
            } else {
                json!({"kind": "analyze", "centroids_file": "centroids"})
            };
            json!({
                "task_id": task_id,
                "version": version,
                "state": "finished",
                "result": result,
            })
        })
        .collect();
    Json(json!({
        "status": {"code": 0},
        "cluster_id": body["cluster_id"],
        "results": results,
    }))
}

async fn drop_jobs(State(worker): State<StubWorker>, Json(body): Json<Value>) -> Json<Value> {
    for id in body["task_ids"].as_array().cloned().unwrap_or_default() {
        if let Some(id) = id.as_i64() {
            worker.jobs.lock().unwrap().remove(&id);
            worker.dropped.lock().unwrap().push(id);
        }
    }
    Json(json!({"code": 0}))
}

async fn serve(app: Router) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

struct Cluster {
    api_port: u16,
    worker: StubWorker,
    meta: Arc<LibSqlMetaStore>,
    scheduler: Arc<TaskScheduler>,
}

/// Start a stub worker and a worker manager that reaches it over HTTP as node 1.
async fn start_worker() -> (StubWorker, Arc<StaticWorkerManager>) {
    let worker = StubWorker::default();
    let worker_app = Router::new()
        .route("/api/v1/jobs/create", post(create))
        .route("/api/v1/jobs/query", post(query))
        .route("/api/v1/jobs/drop", post(drop_jobs))
        .with_state(worker.clone());
    let worker_port = serve(worker_app).await;

    let workers = Arc::new(StaticWorkerManager::new());
    workers.add_node(
        1,
        Arc::new(HttpWorkerClient::new(
            1,
            format!("http://127.0.0.1:{worker_port}"),
        )),
    );
    (worker, workers)
}

/// Start a stub worker, a scheduler wired to it over HTTP, and the coordinator API.
async fn start_cluster(start_scheduler: bool) -> Cluster {
    let (worker, workers) = start_worker().await;

    let meta = Arc::new(LibSqlMetaStore::new_memory().await.unwrap());
    let segments = Arc::new(SegmentRegistry::new());
    let config = SchedulerConfig {
        schedule_interval: Duration::from_millis(20),
        rpc_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let scheduler = TaskScheduler::new(config, meta.clone(), segments.clone(), workers)
        .await
        .unwrap();
    if start_scheduler {
        scheduler.start().unwrap();
    }

    let api_port = serve(coordinator_routes(scheduler.clone(), segments)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    Cluster {
        api_port,
        worker,
        meta,
        scheduler,
    }
}

fn index_job(task_id: i64, segment_id: i64) -> Value {
    json!({
        "task_id": task_id,
        "job": {
            "kind": "index_build",
            "collection_id": 100,
            "partition_id": 200,
            "segment_id": segment_id,
            "field_id": 400,
            "index_id": 300,
            "num_rows": 4096,
        }
    })
}

#[tokio::test]
async fn index_build_runs_to_completion() {
    timeout(TEST_TIMEOUT, async {
        let cluster = start_cluster(true).await;
        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{}", cluster.api_port);

        let resp = client
            .post(format!("{base}/api/v1/jobs"))
            .json(&index_job(600, 500))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);

        // Finished and cleaned up: gone from the registry.
        loop {
            let resp = reqwest::get(format!("{base}/api/v1/jobs/600")).await.unwrap();
            if resp.status() == 404 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let records = cluster.meta.load_all_tasks().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].state, JobState::Finished);
        assert!(records[0].result.is_some());
        assert_eq!(*cluster.worker.dropped.lock().unwrap(), vec![600]);

        cluster.scheduler.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn duplicate_enqueue_conflicts() {
    timeout(TEST_TIMEOUT, async {
        let cluster = start_cluster(false).await;
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{}/api/v1/jobs", cluster.api_port);

        let first = client.post(&url).json(&index_job(1, 10)).send().await.unwrap();
        assert_eq!(first.status(), 201);
        let second = client.post(&url).json(&index_job(1, 10)).send().await.unwrap();
        assert_eq!(second.status(), 409);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn status_endpoints_reflect_registry() {
    timeout(TEST_TIMEOUT, async {
        let cluster = start_cluster(false).await;
        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{}", cluster.api_port);

        for id in 1..=3 {
            client
                .post(format!("{base}/api/v1/jobs"))
                .json(&index_job(id, 10 + id))
                .send()
                .await
                .unwrap();
        }
        cluster.scheduler.tick().await;

        let stats: Value = reqwest::get(format!("{base}/api/v1/jobs/stats"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats["total"], 3);
        assert_eq!(stats["in_progress"], 3);

        let found: Value = client
            .post(format!("{base}/api/v1/jobs/query"))
            .json(&json!({"task_ids": [2, 42]}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let found = found.as_array().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["task_id"], 2);
        assert_eq!(found[0]["state"], "in_progress");
        assert_eq!(found[0]["node_id"], 1);

        let health: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["scheduler_running"], false);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn segment_drop_removes_tasks_without_worker_cleanup() {
    timeout(TEST_TIMEOUT, async {
        let cluster = start_cluster(false).await;
        let client = reqwest::Client::new();
        let base = format!("http://127.0.0.1:{}", cluster.api_port);

        for id in 1..=5 {
            client
                .post(format!("{base}/api/v1/jobs"))
                .json(&index_job(id, 77))
                .send()
                .await
                .unwrap();
        }
        cluster.scheduler.tick().await;

        let resp: Value = client
            .post(format!("{base}/api/v1/segments/77/drop"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["removed_tasks"], json!([1, 2, 3, 4, 5]));

        cluster.scheduler.tick().await;
        assert!(cluster.scheduler.list_tasks().await.is_empty());
        assert!(cluster.worker.dropped.lock().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn restart_resumes_from_catalog() {
    timeout(TEST_TIMEOUT, async {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");

        {
            let (_worker, workers) = start_worker().await;
            let meta = Arc::new(LibSqlMetaStore::new_local(&path).await.unwrap());
            let scheduler = TaskScheduler::new(
                SchedulerConfig::default(),
                meta,
                Arc::new(SegmentRegistry::new()),
                workers,
            )
            .await
            .unwrap();
            let task: TaskRecord = serde_json::from_value(json!({
                "task_id": 9,
                "cluster_id": "by-dev",
                "state": "init",
                "node_id": null,
                "version": 0,
                "fail_reason": "",
                "spec": index_job(9, 90)["job"],
                "result": null,
                "updated_at": "2026-01-01T00:00:00Z",
            }))
            .unwrap();
            scheduler.enqueue(task).await.unwrap();
            scheduler.tick().await;
            assert_eq!(
                scheduler.get_task(9).await.unwrap().state,
                JobState::InProgress
            );
            scheduler.stop().await;
        }

        // Restarted without any worker: the task is resumed, then demoted
        // because its node is gone.
        let meta = Arc::new(LibSqlMetaStore::new_local(&path).await.unwrap());
        let scheduler = TaskScheduler::new(
            SchedulerConfig::default(),
            meta,
            Arc::new(SegmentRegistry::new()),
            Arc::new(StaticWorkerManager::new()),
        )
        .await
        .unwrap();
        let task = scheduler.get_task(9).await.unwrap();
        assert_eq!(task.state, JobState::InProgress);
        assert_eq!(task.node_id, Some(1));
        assert_eq!(task.version, 1);

        scheduler.tick().await;
        assert_eq!(scheduler.get_task(9).await.unwrap().state, JobState::Retry);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn enqueued_task_survives_restart_without_workers() {
    timeout(TEST_TIMEOUT, async {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");

        {
            let meta = Arc::new(LibSqlMetaStore::new_local(&path).await.unwrap());
            let scheduler = TaskScheduler::new(
                SchedulerConfig::default(),
                meta,
                Arc::new(SegmentRegistry::new()),
                Arc::new(StaticWorkerManager::new()),
            )
            .await
            .unwrap();
            let task: TaskRecord = serde_json::from_value(json!({
                "task_id": 4,
                "cluster_id": "",
                "state": "init",
                "node_id": null,
                "version": 0,
                "fail_reason": "",
                "spec": index_job(4, 40)["job"],
                "result": null,
                "updated_at": "2026-01-01T00:00:00Z",
            }))
            .unwrap();
            scheduler.enqueue(task).await.unwrap();
            scheduler.tick().await;
            assert_eq!(scheduler.get_task(4).await.unwrap().state, JobState::Init);
            scheduler.stop().await;
        }

        let meta = Arc::new(LibSqlMetaStore::new_local(&path).await.unwrap());
        let scheduler = TaskScheduler::new(
            SchedulerConfig::default(),
            meta,
            Arc::new(SegmentRegistry::new()),
            Arc::new(StaticWorkerManager::new()),
        )
        .await
        .unwrap();
        let task = scheduler.get_task(4).await.unwrap();
        assert_eq!(task.state, JobState::Init);
        assert_eq!(task.cluster_id, SchedulerConfig::default().cluster_id);
        assert_eq!(task.node_id, None);
    })
    .await
    .expect("test timed out");
}
