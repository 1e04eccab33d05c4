//! TCP node server and the dispatcher that talks to it.
//!
//! Every connection carries length-delimited frames. Exchange frames are
//! pushed into the node's endpoint manager. A dispatch frame carries one
//! serialized task; the server runs it and answers on the same connection
//! with a task report. Closing a dispatch connection cancels its task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use shardex_common::{Result, ShardexError, TaskId};
use shardex_exchange::{decode_frame, encode_frame, Frame};
use shardex_execution::{Task, TaskOutcome, TaskState};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::node::Node;
use crate::runner::TaskDispatcher;

/// Error of a remote task, in a form that survives the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteError {
    InvalidConfig { message: String },
    Construction { message: String },
    Transport { message: String },
    Unreachable { location: String, reason: String },
    Routing { message: String },
    Codec { message: String },
    Execution { message: String },
    LockTimeout { table: String, waited_ms: u64 },
    TxnConflict { message: String },
    InvalidTxnState { message: String },
    Cancelled { message: String },
    Unsupported { message: String },
}

impl From<&ShardexError> for RemoteError {
    fn from(e: &ShardexError) -> Self {
        let message = |m: &String| m.clone();
        match e {
            ShardexError::InvalidConfig(m) => RemoteError::InvalidConfig { message: message(m) },
            ShardexError::Construction(m) => RemoteError::Construction { message: message(m) },
            ShardexError::Transport(m) => RemoteError::Transport { message: message(m) },
            ShardexError::Unreachable { location, reason } => RemoteError::Unreachable {
                location: location.clone(),
                reason: reason.clone(),
            },
            ShardexError::Routing(m) => RemoteError::Routing { message: message(m) },
            ShardexError::Codec(m) => RemoteError::Codec { message: message(m) },
            ShardexError::Execution(m) => RemoteError::Execution { message: message(m) },
            ShardexError::LockTimeout { table, waited_ms } => RemoteError::LockTimeout {
                table: table.clone(),
                waited_ms: *waited_ms,
            },
            ShardexError::TxnConflict(m) => RemoteError::TxnConflict { message: message(m) },
            ShardexError::InvalidTxnState(m) => RemoteError::InvalidTxnState { message: message(m) },
            ShardexError::Cancelled(m) => RemoteError::Cancelled { message: message(m) },
            ShardexError::Io(io) => RemoteError::Execution {
                message: format!("io error: {io}"),
            },
            ShardexError::Unsupported(m) => RemoteError::Unsupported { message: message(m) },
        }
    }
}

impl From<RemoteError> for ShardexError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::InvalidConfig { message } => ShardexError::InvalidConfig(message),
            RemoteError::Construction { message } => ShardexError::Construction(message),
            RemoteError::Transport { message } => ShardexError::Transport(message),
            RemoteError::Unreachable { location, reason } => ShardexError::Unreachable { location, reason },
            RemoteError::Routing { message } => ShardexError::Routing(message),
            RemoteError::Codec { message } => ShardexError::Codec(message),
            RemoteError::Execution { message } => ShardexError::Execution(message),
            RemoteError::LockTimeout { table, waited_ms } => ShardexError::LockTimeout { table, waited_ms },
            RemoteError::TxnConflict { message } => ShardexError::TxnConflict(message),
            RemoteError::InvalidTxnState { message } => ShardexError::InvalidTxnState(message),
            RemoteError::Cancelled { message } => ShardexError::Cancelled(message),
            RemoteError::Unsupported { message } => ShardexError::Unsupported(message),
        }
    }
}

/// Reply to a dispatch frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub state: TaskState,
    #[serde(default)]
    pub outcome: Option<TaskOutcome>,
    #[serde(default)]
    pub error: Option<RemoteError>,
}

impl TaskReport {
    pub fn from_result(task_id: TaskId, result: &Result<TaskOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                task_id,
                state: TaskState::Finished,
                outcome: Some(outcome.clone()),
                error: None,
            },
            Err(e) => Self {
                task_id,
                state: TaskState::of(result),
                outcome: None,
                error: Some(RemoteError::from(e)),
            },
        }
    }

    pub fn into_result(self) -> Result<TaskOutcome> {
        match (self.outcome, self.error) {
            (_, Some(e)) => Err(e.into()),
            (Some(outcome), None) => Ok(outcome),
            (None, None) => Err(ShardexError::Transport(format!(
                "report for task {} carries neither outcome nor error",
                self.task_id
            ))),
        }
    }
}

fn json_err(what: &str) -> impl Fn(serde_json::Error) -> ShardexError + '_ {
    move |e| ShardexError::Transport(format!("malformed {what}: {e}"))
}

/// Accept connections for `node` until the listener fails.
pub async fn serve(listener: TcpListener, node: Arc<Node>) -> Result<()> {
    info!(location = %node.location(), addr = ?listener.local_addr().ok(), "node listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let node = node.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, node).await {
                warn!(%peer, error = %e, "connection closed with error");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, node: Arc<Node>) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    while let Some(buf) = framed.next().await {
        match decode_frame(buf?.freeze())? {
            Frame::Exchange(msg) => node.endpoints().deliver(msg).await?,
            Frame::Dispatch(body) => {
                let task: Task = serde_json::from_slice(&body).map_err(json_err("task"))?;
                let task_id = task.id;
                debug!(job_id = %task.job_id, task_id = %task_id, "task received");
                let cancel = CancellationToken::new();
                let run = node.run_task(task, cancel.clone());
                tokio::pin!(run);
                let result = tokio::select! {
                    result = &mut run => result,
                    _ = framed.next() => {
                        // the dispatcher went away; stop the task and drop the report
                        cancel.cancel();
                        let _ = run.await;
                        return Ok(());
                    }
                };
                let report = TaskReport::from_result(task_id, &result);
                let body = serde_json::to_vec(&report).map_err(json_err("task report"))?;
                framed
                    .send(encode_frame(&Frame::TaskReport(Bytes::from(body))))
                    .await
                    .map_err(|e| ShardexError::Transport(format!("task report write failed: {e}")))?;
                return Ok(());
            }
            Frame::TaskReport(_) => {
                return Err(ShardexError::Transport("unexpected task report from peer".to_string()));
            }
        }
    }
    Ok(())
}

/// Dispatches tasks to remote nodes over TCP, one connection per task.
#[derive(Debug, Clone)]
pub struct TcpDispatcher {
    connect_timeout: Duration,
}

impl TcpDispatcher {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl TaskDispatcher for TcpDispatcher {
    async fn dispatch(&self, task: Task, cancel: CancellationToken) -> Result<TaskOutcome> {
        let location = task.location.clone();
        let unreachable = |reason: String| ShardexError::Unreachable {
            location: location.to_string(),
            reason,
        };
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ShardexError::Cancelled(format!("dispatch of task {} cancelled", task.id)));
            }
            r = tokio::time::timeout(self.connect_timeout, TcpStream::connect(location.addr())) => match r {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(unreachable(e.to_string())),
                Err(_) => return Err(unreachable(format!("connect timed out after {:?}", self.connect_timeout))),
            },
        };
        stream.set_nodelay(true)?;
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
        let body = serde_json::to_vec(&task).map_err(json_err("task"))?;
        framed
            .send(encode_frame(&Frame::Dispatch(Bytes::from(body))))
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let reply = tokio::select! {
            biased;
            // dropping the connection cancels the remote task
            _ = cancel.cancelled() => {
                return Err(ShardexError::Cancelled(format!("task {} at {location} cancelled", task.id)));
            }
            reply = framed.next() => reply,
        };
        match reply {
            Some(Ok(buf)) => match decode_frame(buf.freeze())? {
                Frame::TaskReport(body) => {
                    let report: TaskReport = serde_json::from_slice(&body).map_err(json_err("task report"))?;
                    report.into_result()
                }
                _ => Err(ShardexError::Transport(format!("unexpected reply from {location}"))),
            },
            Some(Err(e)) => Err(ShardexError::Transport(format!("reading report from {location} failed: {e}"))),
            None => Err(ShardexError::Transport(format!(
                "{location} closed the connection before reporting task {}",
                task.id
            ))),
        }
    }
}
