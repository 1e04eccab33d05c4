use bytes::Bytes;
use shardex_common::Tag;

/// Per-tag flow-control flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatus {
    NotReady,
    Ready,
}

/// Tagged message carried by a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// One encoded tuple batch.
    Data { tag: Tag, payload: Bytes },
    /// End of the stream for `tag`.
    Eof { tag: Tag },
    /// The sending task failed; the receiver must fail too.
    Abort { tag: Tag, reason: String },
    /// Flow-control update addressed to the sending side.
    Control { tag: Tag, status: ControlStatus },
}

impl Message {
    pub fn tag(&self) -> Tag {
        match self {
            Message::Data { tag, .. }
            | Message::Eof { tag }
            | Message::Abort { tag, .. }
            | Message::Control { tag, .. } => *tag,
        }
    }
}

/// Item of a receiver's inbound queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Data(Bytes),
    Eof,
    Abort(String),
}
