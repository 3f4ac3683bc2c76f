//! HTTP/JSON worker client.
//!
//! Workers expose `POST {base}/api/v1/jobs/{create,query,drop}`; each takes
//! and returns the JSON form of the corresponding request/response types.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::WorkerError;
use crate::task::NodeId;
use crate::worker::client::{
    CreateJobRequest, DropJobsRequest, QueryJobsRequest, QueryJobsResponse, RpcStatus,
    WorkerClient,
};

/// RPC stub for one worker reachable over HTTP.
pub struct HttpWorkerClient {
    node_id: NodeId,
    base_url: String,
    client: reqwest::Client,
}

impl HttpWorkerClient {
    pub fn new(node_id: NodeId, base_url: impl Into<String>) -> Self {
        Self {
            node_id,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, WorkerError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/api/v1/jobs/{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| WorkerError::Transport {
                node_id: self.node_id,
                reason: format!("POST {url}: {e}"),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WorkerError::Transport {
                node_id: self.node_id,
                reason: format!("POST {url} returned {status}: {body}"),
            });
        }

        resp.json::<Resp>()
            .await
            .map_err(|e| WorkerError::InvalidResponse {
                node_id: self.node_id,
                reason: format!("{path}: {e}"),
            })
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn create_job(&self, request: CreateJobRequest) -> Result<RpcStatus, WorkerError> {
        self.post("create", &request).await
    }

    async fn query_jobs(
        &self,
        request: QueryJobsRequest,
    ) -> Result<QueryJobsResponse, WorkerError> {
        self.post("query", &request).await
    }

    async fn drop_jobs(&self, request: DropJobsRequest) -> Result<RpcStatus, WorkerError> {
        self.post("drop", &request).await
    }
}
