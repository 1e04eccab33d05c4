use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use shardex_common::{global_metrics, Location, Result, ShardexError, Tag};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelFactory};
use crate::endpoint::EndpointManager;
use crate::message::{ControlStatus, Message};

/// Sending half of one exchange.
pub struct SendEndpoint {
    tag: Tag,
    target: Location,
    manager: Arc<EndpointManager>,
    status: watch::Receiver<ControlStatus>,
    channel: Arc<dyn Channel>,
    cancel: CancellationToken,
    closed: bool,
}

impl SendEndpoint {
    /// Register `tag` with the local manager and open a channel to `target`.
    pub async fn init(
        tag: Tag,
        target: Location,
        manager: Arc<EndpointManager>,
        channels: &dyn ChannelFactory,
        connect_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let status = manager.register_send_endpoint(tag);
        let opened = tokio::select! {
            _ = cancel.cancelled() => Err(ShardexError::Cancelled(format!("send endpoint {tag} cancelled while connecting"))),
            r = tokio::time::timeout(connect_timeout, channels.open(&target)) => match r {
                Ok(ch) => ch,
                Err(_) => Err(ShardexError::Unreachable {
                    location: target.to_string(),
                    reason: format!("connect timed out after {} ms", connect_timeout.as_millis()),
                }),
            },
        };
        let channel = match opened {
            Ok(ch) => ch,
            Err(e) => {
                manager.unregister_send_endpoint(tag);
                return Err(match e {
                    ShardexError::Unreachable { .. } | ShardexError::Cancelled(_) => e,
                    other => ShardexError::Unreachable {
                        location: target.to_string(),
                        reason: other.to_string(),
                    },
                });
            }
        };
        debug!(tag = %tag, target = %target, "send endpoint opened");
        Ok(Self {
            tag,
            target,
            manager,
            status,
            channel,
            cancel,
            closed: false,
        })
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Wait until the receiver has flagged this tag Ready.
    pub async fn check_status(&mut self) -> Result<()> {
        if *self.status.borrow() == ControlStatus::Ready {
            return Ok(());
        }
        let started = Instant::now();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(ShardexError::Cancelled(format!(
                    "send endpoint {} cancelled while waiting for receiver",
                    self.tag
                )));
            }
            r = self.status.wait_for(|s| *s == ControlStatus::Ready) => {
                r.map_err(|_| ShardexError::Transport(format!(
                    "status of tag {} dropped before receiver became ready",
                    self.tag
                )))?;
            }
        }
        global_metrics().record_ready_wait(self.tag.job.0, started.elapsed().as_secs_f64());
        debug!(tag = %self.tag, waited_ms = started.elapsed().as_millis() as u64, "receiver ready");
        Ok(())
    }

    pub async fn send(&mut self, payload: Bytes) -> Result<()> {
        self.check_status().await?;
        let bytes = payload.len() as u64;
        self.write(Message::Data {
            tag: self.tag,
            payload,
        })
        .await?;
        global_metrics().record_exchange_sent(self.tag.job.0, bytes);
        Ok(())
    }

    /// Signal end of stream.
    pub async fn finish(&mut self) -> Result<()> {
        self.check_status().await?;
        self.write(Message::Eof { tag: self.tag }).await
    }

    /// Best effort: tell the receiver this stream failed.
    ///
    /// The abort still waits for Ready, since an abort reaching the receiver
    /// before it registered would be dropped. Cancellation skips it.
    pub async fn abort(&mut self, reason: &str) {
        if self.check_status().await.is_err() {
            debug!(tag = %self.tag, "abort skipped, receiver never became ready");
            return;
        }
        let msg = Message::Abort {
            tag: self.tag,
            reason: reason.to_string(),
        };
        if let Err(e) = self.channel.send(msg).await {
            warn!(tag = %self.tag, target = %self.target, error = %e, "abort not delivered");
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        self.manager.unregister_send_endpoint(self.tag);
        self.channel.close().await
    }

    async fn write(&self, msg: Message) -> Result<()> {
        self.channel.send(msg).await.map_err(|e| match e {
            ShardexError::Transport(_) | ShardexError::Cancelled(_) => e,
            other => ShardexError::Transport(format!(
                "send to {} for tag {} failed: {other}",
                self.target, self.tag
            )),
        })
    }
}

impl Drop for SendEndpoint {
    fn drop(&mut self) {
        if !self.closed {
            self.manager.unregister_send_endpoint(self.tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use shardex_common::{JobId, Location, OperatorId, ShardexError, Tag};
    use tokio_util::sync::CancellationToken;

    use super::SendEndpoint;
    use crate::channel::LocalNetwork;
    use crate::endpoint::EndpointManager;
    use crate::message::{ControlStatus, Inbound};

    fn setup() -> (Arc<LocalNetwork>, Arc<EndpointManager>, Arc<EndpointManager>) {
        let net = Arc::new(LocalNetwork::new());
        let a = Arc::new(EndpointManager::new(Location::new("a", 1)));
        let b = Arc::new(EndpointManager::new(Location::new("b", 2)));
        net.register(a.clone());
        net.register(b.clone());
        (net, a, b)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocked_send_proceeds_exactly_once_after_ready() {
        let (net, a, b) = setup();
        let tag = Tag::new(JobId(1), OperatorId(5));
        let mut queue = b.register_receive_endpoint(tag, 8).expect("queue");
        let mut send = SendEndpoint::init(
            tag,
            Location::new("b", 2),
            a.clone(),
            net.as_ref(),
            Duration::from_secs(1),
            CancellationToken::new(),
        )
        .await
        .expect("init");

        let sender = tokio::spawn(async move {
            send.send(Bytes::from_static(b"batch")).await.expect("send");
            send
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sender.is_finished());
        assert!(queue.try_recv().is_err());

        a.set_status(tag, ControlStatus::Ready);
        let send = sender.await.expect("join");
        assert_eq!(queue.recv().await, Some(Inbound::Data(Bytes::from_static(b"batch"))));
        assert!(queue.try_recv().is_err());
        send.close().await.expect("close");
    }

    #[tokio::test]
    async fn cancellation_unblocks_waiting_sender() {
        let (net, a, _b) = setup();
        let cancel = CancellationToken::new();
        let mut send = SendEndpoint::init(
            Tag::new(JobId(2), OperatorId(1)),
            Location::new("b", 2),
            a,
            net.as_ref(),
            Duration::from_secs(1),
            cancel.clone(),
        )
        .await
        .expect("init");
        cancel.cancel();
        let err = send.send(Bytes::new()).await.unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn init_fails_for_unknown_location() {
        let (net, a, _b) = setup();
        let err = SendEndpoint::init(
            Tag::new(JobId(3), OperatorId(1)),
            Location::new("nowhere", 9),
            a.clone(),
            net.as_ref(),
            Duration::from_secs(1),
            CancellationToken::new(),
        )
        .await
        .err()
        .expect("unreachable");
        assert!(err.to_string().contains("could not reach location nowhere:9"));
        assert!(matches!(err, ShardexError::Unreachable { .. }));
        assert_eq!(a.endpoint_count(), 0);
    }
}
