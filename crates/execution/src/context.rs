use std::sync::Arc;

use shardex_common::{ExecConfig, JobId, Location, TaskId};
use shardex_exchange::{ChannelFactory, EndpointManager};
use shardex_storage::StoreService;
use tokio_util::sync::CancellationToken;

/// Everything a node provides to the tasks it runs.
#[derive(Clone)]
pub struct NodeServices {
    pub location: Location,
    pub endpoints: Arc<EndpointManager>,
    pub channels: Arc<dyn ChannelFactory>,
    pub stores: Arc<dyn StoreService>,
    pub config: ExecConfig,
}

impl std::fmt::Debug for NodeServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeServices")
            .field("location", &self.location)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TaskContext {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub node: Arc<NodeServices>,
    /// Fired when the job is aborted; every blocking point watches it.
    pub cancel: CancellationToken,
}

pub type SharedTaskContext = Arc<TaskContext>;
