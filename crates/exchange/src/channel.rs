use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use shardex_common::{Location, Result, ShardexError};

use crate::endpoint::EndpointManager;
use crate::message::Message;

/// Ordered, tagged message pipe to one remote location.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn send(&self, msg: Message) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Opens channels; may wait on connection establishment.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn open(&self, location: &Location) -> Result<Arc<dyn Channel>>;
}

/// In-process network: channels deliver straight into the target node's
/// endpoint manager. Several nodes can share one process this way.
#[derive(Debug, Default)]
pub struct LocalNetwork {
    nodes: RwLock<HashMap<Location, Arc<EndpointManager>>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, manager: Arc<EndpointManager>) {
        self.nodes.write().insert(manager.location().clone(), manager);
    }

    pub fn unregister(&self, location: &Location) {
        self.nodes.write().remove(location);
    }
}

#[async_trait]
impl ChannelFactory for LocalNetwork {
    async fn open(&self, location: &Location) -> Result<Arc<dyn Channel>> {
        let manager = self.nodes.read().get(location).cloned().ok_or_else(|| {
            ShardexError::Unreachable {
                location: location.to_string(),
                reason: "no such node on the local network".to_string(),
            }
        })?;
        Ok(Arc::new(LocalChannel { manager }))
    }
}

struct LocalChannel {
    manager: Arc<EndpointManager>,
}

#[async_trait]
impl Channel for LocalChannel {
    async fn send(&self, msg: Message) -> Result<()> {
        self.manager.deliver(msg).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
