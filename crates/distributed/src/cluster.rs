//! In-process cluster: several nodes sharing one [`LocalNetwork`], each task
//! spawned onto its own Tokio task.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use shardex_common::{ExecConfig, JobId, Location, Result, ShardexError};
use shardex_exchange::LocalNetwork;
use shardex_execution::{Task, TaskOutcome};
use tokio_util::sync::CancellationToken;

use crate::node::Node;
use crate::runner::{JobRunner, TaskDispatcher};

#[derive(Debug)]
pub struct LocalCluster {
    network: Arc<LocalNetwork>,
    nodes: BTreeMap<Location, Node>,
    config: ExecConfig,
}

impl LocalCluster {
    /// One in-memory node per location.
    pub fn new(locations: &[Location], config: ExecConfig) -> Arc<Self> {
        let network = Arc::new(LocalNetwork::new());
        let nodes = locations
            .iter()
            .map(|location| {
                let node = Node::in_memory(location.clone(), network.clone(), config.clone());
                network.register(node.endpoints().clone());
                (location.clone(), node)
            })
            .collect();
        Arc::new(Self {
            network,
            nodes,
            config,
        })
    }

    pub fn node(&self, location: &Location) -> Option<&Node> {
        self.nodes.get(location)
    }

    /// Take a node off the network; channels to it then fail to open.
    pub fn disconnect(&self, location: &Location) {
        self.network.unregister(location);
    }

    pub fn runner(self: &Arc<Self>) -> JobRunner {
        JobRunner::new(self.clone(), self.config.clone())
    }
}

#[async_trait]
impl TaskDispatcher for LocalCluster {
    async fn dispatch(&self, task: Task, cancel: CancellationToken) -> Result<TaskOutcome> {
        let node = self
            .nodes
            .get(&task.location)
            .cloned()
            .ok_or_else(|| ShardexError::Unreachable {
                location: task.location.to_string(),
                reason: "no node at this location".to_string(),
            })?;
        let task_id = task.id;
        tokio::spawn(async move { node.run_task(task, cancel).await })
            .await
            .map_err(|e| ShardexError::Execution(format!("task {task_id} panicked or was aborted: {e}")))?
    }

    async fn release_job(&self, job: JobId) {
        for node in self.nodes.values() {
            node.release_job(job);
        }
    }
}
