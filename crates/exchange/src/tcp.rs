//! TCP transport: length-delimited frames over one connection per channel.
//!
//! Frame layout after the length prefix: a one-byte kind, then for exchange
//! frames the tag (`job: u64`, `receiver: u64`, big-endian) and the body.
//! Dispatch and task-report frames carry an opaque body.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::SinkExt;
use shardex_common::{JobId, Location, OperatorId, Result, ShardexError, Tag};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};

use crate::channel::{Channel, ChannelFactory};
use crate::message::{ControlStatus, Message};

const KIND_DATA: u8 = 1;
const KIND_EOF: u8 = 2;
const KIND_ABORT: u8 = 3;
const KIND_CONTROL: u8 = 4;
const KIND_DISPATCH: u8 = 5;
const KIND_TASK_REPORT: u8 = 6;

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Exchange(Message),
    /// Serialized task to run on the receiving node.
    Dispatch(Bytes),
    /// Serialized outcome of a dispatched task.
    TaskReport(Bytes),
}

pub fn encode_frame(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::new();
    match frame {
        Frame::Exchange(msg) => {
            let kind = match msg {
                Message::Data { .. } => KIND_DATA,
                Message::Eof { .. } => KIND_EOF,
                Message::Abort { .. } => KIND_ABORT,
                Message::Control { .. } => KIND_CONTROL,
            };
            buf.put_u8(kind);
            let tag = msg.tag();
            buf.put_u64(tag.job.0);
            buf.put_u64(tag.receiver.0);
            match msg {
                Message::Data { payload, .. } => buf.put_slice(payload),
                Message::Eof { .. } => {}
                Message::Abort { reason, .. } => buf.put_slice(reason.as_bytes()),
                Message::Control { status, .. } => buf.put_u8(match status {
                    ControlStatus::NotReady => 0,
                    ControlStatus::Ready => 1,
                }),
            }
        }
        Frame::Dispatch(body) => {
            buf.put_u8(KIND_DISPATCH);
            buf.put_slice(body);
        }
        Frame::TaskReport(body) => {
            buf.put_u8(KIND_TASK_REPORT);
            buf.put_slice(body);
        }
    }
    buf.freeze()
}

pub fn decode_frame(mut buf: Bytes) -> Result<Frame> {
    if !buf.has_remaining() {
        return Err(ShardexError::Transport("empty frame".to_string()));
    }
    let kind = buf.get_u8();
    match kind {
        KIND_DISPATCH => return Ok(Frame::Dispatch(buf)),
        KIND_TASK_REPORT => return Ok(Frame::TaskReport(buf)),
        KIND_DATA | KIND_EOF | KIND_ABORT | KIND_CONTROL => {}
        other => return Err(ShardexError::Transport(format!("unknown frame kind {other}"))),
    }
    if buf.remaining() < 16 {
        return Err(ShardexError::Transport("truncated exchange frame".to_string()));
    }
    let tag = Tag::new(JobId(buf.get_u64()), OperatorId(buf.get_u64()));
    let msg = match kind {
        KIND_DATA => Message::Data { tag, payload: buf },
        KIND_EOF => Message::Eof { tag },
        KIND_ABORT => Message::Abort {
            tag,
            reason: String::from_utf8_lossy(&buf).into_owned(),
        },
        _ => {
            if !buf.has_remaining() {
                return Err(ShardexError::Transport("truncated control frame".to_string()));
            }
            let status = match buf.get_u8() {
                0 => ControlStatus::NotReady,
                1 => ControlStatus::Ready,
                s => return Err(ShardexError::Transport(format!("unknown control status {s}"))),
            };
            Message::Control { tag, status }
        }
    };
    Ok(Frame::Exchange(msg))
}

/// Write half of a framed connection.
pub type FrameSink = FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>;

pub struct TcpChannel {
    remote: Location,
    sink: Mutex<FrameSink>,
}

impl TcpChannel {
    pub async fn connect(location: &Location) -> Result<Self> {
        let stream = TcpStream::connect(location.addr())
            .await
            .map_err(|e| ShardexError::Unreachable {
                location: location.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        // this channel never reads; the peer only answers dispatch connections
        let (_read, write) = stream.into_split();
        Ok(Self {
            remote: location.clone(),
            sink: Mutex::new(FramedWrite::new(write, LengthDelimitedCodec::new())),
        })
    }

    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.sink
            .lock()
            .await
            .send(encode_frame(frame))
            .await
            .map_err(|e| ShardexError::Transport(format!("write to {} failed: {e}", self.remote)))
    }
}

#[async_trait]
impl Channel for TcpChannel {
    async fn send(&self, msg: Message) -> Result<()> {
        self.send_frame(&Frame::Exchange(msg)).await
    }

    async fn close(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        SinkExt::<Bytes>::close(&mut *sink)
            .await
            .map_err(|e| ShardexError::Transport(format!("close of channel to {} failed: {e}", self.remote)))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpChannelFactory;

#[async_trait]
impl ChannelFactory for TcpChannelFactory {
    async fn open(&self, location: &Location) -> Result<Arc<dyn Channel>> {
        Ok(Arc::new(TcpChannel::connect(location).await?))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use shardex_common::{JobId, OperatorId, Tag};

    use super::{decode_frame, encode_frame, Frame};
    use crate::message::{ControlStatus, Message};

    #[test]
    fn control_frame_keeps_tag_and_status() {
        let tag = Tag::new(JobId(u64::MAX), OperatorId(3));
        let frame = Frame::Exchange(Message::Control {
            tag,
            status: ControlStatus::Ready,
        });
        assert_eq!(decode_frame(encode_frame(&frame)).expect("decode"), frame);
    }

    #[test]
    fn rejects_truncated_and_unknown_frames() {
        assert!(decode_frame(Bytes::new()).is_err());
        assert!(decode_frame(Bytes::from_static(&[1, 0, 0])).is_err());
        assert!(decode_frame(Bytes::from_static(&[42])).is_err());
    }

    #[test]
    fn dispatch_body_is_opaque() {
        let f = Frame::Dispatch(Bytes::from_static(b"{\"task\":1}"));
        assert_eq!(decode_frame(encode_frame(&f)).expect("decode"), f);
    }
}
