//! Node runtime: the services one location offers to the tasks placed on it.

use std::sync::Arc;

use shardex_common::{global_metrics, ExecConfig, JobId, Location, Result, ShardexError};
use shardex_exchange::{ChannelFactory, EndpointManager};
use shardex_execution::{NodeServices, Task, TaskContext, TaskOutcome, TaskState};
use shardex_storage::{MemoryStoreService, StoreService};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

#[derive(Debug, Clone)]
pub struct Node {
    services: Arc<NodeServices>,
}

impl Node {
    pub fn new(
        location: Location,
        channels: Arc<dyn ChannelFactory>,
        stores: Arc<dyn StoreService>,
        config: ExecConfig,
    ) -> Self {
        let endpoints = Arc::new(EndpointManager::new(location.clone()));
        Self {
            services: Arc::new(NodeServices {
                location,
                endpoints,
                channels,
                stores,
                config,
            }),
        }
    }

    /// A node backed by in-memory partitions.
    pub fn in_memory(location: Location, channels: Arc<dyn ChannelFactory>, config: ExecConfig) -> Self {
        Self::new(location, channels, Arc::new(MemoryStoreService::new()), config)
    }

    pub fn location(&self) -> &Location {
        &self.services.location
    }

    pub fn services(&self) -> &Arc<NodeServices> {
        &self.services
    }

    pub fn endpoints(&self) -> &Arc<EndpointManager> {
        &self.services.endpoints
    }

    /// Run one task of a job to completion on this node.
    pub async fn run_task(&self, mut task: Task, cancel: CancellationToken) -> Result<TaskOutcome> {
        if task.location != self.services.location {
            return Err(ShardexError::Construction(format!(
                "task {} is placed at {}, not at {}",
                task.id, task.location, self.services.location
            )));
        }
        let location = self.services.location.to_string();
        let span = info_span!("task", job_id = %task.job_id, task_id = %task.id, location = %location);
        let ctx = Arc::new(TaskContext {
            job_id: task.job_id,
            task_id: task.id,
            node: self.services.clone(),
            cancel,
        });

        global_metrics().inc_running_tasks(&location);
        let result = task.run(ctx).instrument(span).await;
        global_metrics().dec_running_tasks(&location);

        match &result {
            Err(e) if task.state == TaskState::Failed => {
                error!(job_id = %task.job_id, task_id = %task.id, location = %location, error = %e, "task failed");
            }
            Err(_) => info!(job_id = %task.job_id, task_id = %task.id, "task cancelled"),
            Ok(_) => {}
        }
        global_metrics().inc_task_outcome(&location, task.state.as_str());
        result
    }

    /// Drop every endpoint the job left on this node.
    pub fn release_job(&self, job: JobId) {
        self.services.endpoints.release_job(job);
    }
}
