use std::collections::HashMap;

use parking_lot::Mutex;
use shardex_common::{JobId, Location, Result, ShardexError, Tag};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::message::{ControlStatus, Inbound, Message};

/// Per-node registry of exchange endpoints.
///
/// Holds the flow-control status of every local send endpoint and the inbound
/// queue of every local receive endpoint, both keyed by tag. One instance is
/// owned by each node and handed to the endpoints it creates.
#[derive(Debug)]
pub struct EndpointManager {
    location: Location,
    statuses: Mutex<HashMap<Tag, watch::Sender<ControlStatus>>>,
    inbound: Mutex<HashMap<Tag, mpsc::Sender<Inbound>>>,
}

impl EndpointManager {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            statuses: Mutex::new(HashMap::new()),
            inbound: Mutex::new(HashMap::new()),
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Subscribe a send endpoint to the status of `tag`.
    ///
    /// A status set before registration (the receiver was faster) is kept.
    pub fn register_send_endpoint(&self, tag: Tag) -> watch::Receiver<ControlStatus> {
        self.statuses
            .lock()
            .entry(tag)
            .or_insert_with(|| watch::channel(ControlStatus::NotReady).0)
            .subscribe()
    }

    pub fn get_status(&self, tag: Tag) -> ControlStatus {
        self.statuses
            .lock()
            .get(&tag)
            .map(|tx| *tx.borrow())
            .unwrap_or(ControlStatus::NotReady)
    }

    /// Set the status of `tag` and wake every sender waiting on it.
    pub fn set_status(&self, tag: Tag, status: ControlStatus) {
        let mut statuses = self.statuses.lock();
        match statuses.get(&tag) {
            Some(tx) => {
                tx.send_replace(status);
            }
            None => {
                statuses.insert(tag, watch::channel(status).0);
            }
        }
        debug!(tag = %tag, status = ?status, location = %self.location, "exchange status changed");
    }

    /// Create the inbound queue of a local receive endpoint.
    pub fn register_receive_endpoint(&self, tag: Tag, capacity: usize) -> Result<mpsc::Receiver<Inbound>> {
        let mut inbound = self.inbound.lock();
        if inbound.contains_key(&tag) {
            return Err(ShardexError::Construction(format!(
                "receive endpoint for tag {tag} already registered at {}",
                self.location
            )));
        }
        let (tx, rx) = mpsc::channel(capacity.max(1));
        inbound.insert(tag, tx);
        Ok(rx)
    }

    /// Push an arriving message to the endpoint its tag names.
    ///
    /// Waits while the target queue is full. Data for an unknown tag is a
    /// transport error; a late abort for a receiver already gone is dropped.
    pub async fn deliver(&self, msg: Message) -> Result<()> {
        let (tag, item) = match msg {
            Message::Control { tag, status } => {
                self.set_status(tag, status);
                return Ok(());
            }
            Message::Data { tag, payload } => (tag, Inbound::Data(payload)),
            Message::Eof { tag } => (tag, Inbound::Eof),
            Message::Abort { tag, reason } => (tag, Inbound::Abort(reason)),
        };
        let queue = self.inbound.lock().get(&tag).cloned();
        let Some(queue) = queue else {
            if matches!(item, Inbound::Abort(_)) {
                debug!(tag = %tag, location = %self.location, "dropping abort for unknown tag");
                return Ok(());
            }
            return Err(ShardexError::Transport(format!(
                "no receive endpoint for tag {tag} at {}",
                self.location
            )));
        };
        queue.send(item).await.map_err(|_| {
            ShardexError::Transport(format!("receive endpoint for tag {tag} closed"))
        })
    }

    pub fn unregister_send_endpoint(&self, tag: Tag) {
        self.statuses.lock().remove(&tag);
    }

    pub fn unregister_receive_endpoint(&self, tag: Tag) {
        self.inbound.lock().remove(&tag);
    }

    /// Drop every entry of `job`, including statuses for senders that never
    /// registered.
    pub fn release_job(&self, job: JobId) {
        self.statuses.lock().retain(|tag, _| tag.job != job);
        self.inbound.lock().retain(|tag, _| tag.job != job);
    }

    pub fn endpoint_count(&self) -> usize {
        self.statuses.lock().len() + self.inbound.lock().len()
    }
}
