//! Exchange subsystem: the only path tuples take between locations.
//!
//! A send endpoint waits until the receiving side has flagged its tag Ready in
//! the sender's [`EndpointManager`], then writes tagged payloads to a
//! [`Channel`]. Inbound messages are pushed into the receiving node's manager
//! and demultiplexed by tag into bounded per-receiver queues.

pub mod channel;
pub mod endpoint;
pub mod message;
pub mod receive;
pub mod send;
pub mod tcp;

pub use channel::{Channel, ChannelFactory, LocalNetwork};
pub use endpoint::EndpointManager;
pub use message::{ControlStatus, Inbound, Message};
pub use receive::ReceiveEndpoint;
pub use send::SendEndpoint;
pub use tcp::{decode_frame, encode_frame, Frame, TcpChannel, TcpChannelFactory};
