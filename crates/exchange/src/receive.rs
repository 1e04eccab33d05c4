use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use shardex_common::{global_metrics, Location, Result, ShardexError, Tag};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::ChannelFactory;
use crate::endpoint::EndpointManager;
use crate::message::{ControlStatus, Inbound, Message};

/// Receiving half of one exchange.
pub struct ReceiveEndpoint {
    tag: Tag,
    manager: Arc<EndpointManager>,
    queue: mpsc::Receiver<Inbound>,
    cancel: CancellationToken,
    finished: bool,
}

impl ReceiveEndpoint {
    /// Create the inbound queue for `tag`, then flag the tag Ready at the
    /// sender's location.
    pub async fn init(
        tag: Tag,
        source: Location,
        manager: Arc<EndpointManager>,
        channels: &dyn ChannelFactory,
        queue_capacity: usize,
        connect_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let queue = manager.register_receive_endpoint(tag, queue_capacity)?;
        let endpoint = Self {
            tag,
            manager,
            queue,
            cancel,
            finished: false,
        };
        let ready = async {
            let channel = channels.open(&source).await?;
            channel
                .send(Message::Control {
                    tag,
                    status: ControlStatus::Ready,
                })
                .await?;
            channel.close().await
        };
        tokio::select! {
            _ = endpoint.cancel.cancelled() => {
                return Err(ShardexError::Cancelled(format!("receive endpoint {tag} cancelled while signalling ready")));
            }
            r = tokio::time::timeout(connect_timeout, ready) => match r {
                Ok(r) => r.map_err(|e| match e {
                    ShardexError::Unreachable { .. } => e,
                    other => ShardexError::Unreachable {
                        location: source.to_string(),
                        reason: other.to_string(),
                    },
                })?,
                Err(_) => {
                    return Err(ShardexError::Unreachable {
                        location: source.to_string(),
                        reason: format!("connect timed out after {} ms", connect_timeout.as_millis()),
                    });
                }
            },
        }
        debug!(tag = %tag, source = %source, "receive endpoint ready");
        Ok(endpoint)
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Next payload, or `None` once the sender has finished the stream.
    pub async fn next(&mut self) -> Result<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }
        let item = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(ShardexError::Cancelled(format!(
                    "receive endpoint {} cancelled",
                    self.tag
                )));
            }
            item = self.queue.recv() => item,
        };
        match item {
            Some(Inbound::Data(payload)) => {
                global_metrics().record_exchange_received(self.tag.job.0, payload.len() as u64);
                Ok(Some(payload))
            }
            Some(Inbound::Eof) => {
                self.finished = true;
                Ok(None)
            }
            Some(Inbound::Abort(reason)) => Err(ShardexError::Transport(format!(
                "sender of tag {} aborted: {reason}",
                self.tag
            ))),
            None => Err(ShardexError::Transport(format!(
                "inbound queue of tag {} closed before end of stream",
                self.tag
            ))),
        }
    }
}

impl Drop for ReceiveEndpoint {
    fn drop(&mut self) {
        self.manager.unregister_receive_endpoint(self.tag);
    }
}
