//! Remote-debugging session runtime.
//!
//! Owns the websocket plumbing and the JSON-RPC style correlation of the
//! debug protocol. Higher layers talk to a session through
//! [`ProtocolChannel`] and never see frames.

pub mod connection;
pub mod error;
pub mod transport;

pub use connection::{CallFuture, DEFAULT_CALL_TIMEOUT, DebugSession, ProtocolChannel, SessionOptions};
pub use error::{Error, Result};
pub use transport::{ChannelPeer, TransportParts, WebSocketTransport, channel_transport};
