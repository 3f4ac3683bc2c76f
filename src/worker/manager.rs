//! Worker registry: live RPC stubs keyed by node id.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rand::seq::SliceRandom;

use crate::task::NodeId;
use crate::worker::client::WorkerClient;

/// Discovery and selection of worker nodes.
pub trait WorkerManager: Send + Sync {
    /// Pick any worker able to take a job.
    fn pick_client(&self) -> Option<(NodeId, Arc<dyn WorkerClient>)>;

    /// Resolve a specific worker. `None` once the node has left.
    fn get_client_by_id(&self, node_id: NodeId) -> Option<Arc<dyn WorkerClient>>;
}

/// Worker table populated at startup (and updated as nodes join or leave).
#[derive(Default)]
pub struct StaticWorkerManager {
    clients: RwLock<HashMap<NodeId, Arc<dyn WorkerClient>>>,
}

impl StaticWorkerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node_id: NodeId, client: Arc<dyn WorkerClient>) {
        if let Ok(mut clients) = self.clients.write() {
            clients.insert(node_id, client);
            tracing::info!(node_id, "Worker node registered");
        }
    }

    pub fn remove_node(&self, node_id: NodeId) -> bool {
        match self.clients.write() {
            Ok(mut clients) => {
                let removed = clients.remove(&node_id).is_some();
                if removed {
                    tracing::info!(node_id, "Worker node removed");
                }
                removed
            }
            Err(_) => false,
        }
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .clients
            .read()
            .map(|clients| clients.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }
}

impl WorkerManager for StaticWorkerManager {
    fn pick_client(&self) -> Option<(NodeId, Arc<dyn WorkerClient>)> {
        let clients = self.clients.read().ok()?;
        let ids: Vec<NodeId> = clients.keys().copied().collect();
        let node_id = *ids.choose(&mut rand::thread_rng())?;
        clients.get(&node_id).map(|c| (node_id, Arc::clone(c)))
    }

    fn get_client_by_id(&self, node_id: NodeId) -> Option<Arc<dyn WorkerClient>> {
        self.clients.read().ok()?.get(&node_id).cloned()
    }
}
