//! Connection seam: what the relay needs from a peer connection, and the events
//! a connection feeds back into its session.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::protocol::{ClientIdentity, PacketEvent, PacketMeta};
use crate::wire::{FrameDecodeError, FrameEncodeError};

/// Which peer of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Upstream,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => f.write_str("Client"),
            Side::Upstream => f.write_str("Upstream"),
        }
    }
}

/// A peer connection. Every call submits work and returns immediately; failures
/// come back later as `SessionEvent::Error` / `SessionEvent::End`.
pub trait Connection: Send + Sync {
    /// Forward bytes exactly as received.
    fn write_raw(&self, bytes: Vec<u8>);
    /// Encode and send a packet.
    fn write(&self, meta: &PacketMeta, fields: &Value);
    /// Close the connection, telling the peer `reason` when given. Idempotent.
    fn end(&self, reason: Option<&str>);
}

/// Opens the upstream connection for a newly accepted client.
pub trait UpstreamFactory {
    fn open(&self, identity: &ClientIdentity) -> Result<Arc<dyn Connection>, ConnectionError>;
}

/// Inbound event from one of a session's connections.
#[derive(Debug)]
pub enum SessionEvent {
    Packet { from: Side, packet: PacketEvent },
    End { side: Side, reason: Option<String> },
    Error { side: Side, error: TransportError },
}

/// Upstream connection could not be constructed.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("invalid upstream address: {0}")]
    InvalidAddress(String),
    #[error("failed to encode login: {0}")]
    Login(#[source] FrameEncodeError),
}

/// Non-fatal error reported by a connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("malformed frame")]
    Decode(#[from] FrameDecodeError),
    #[error("failed to encode packet")]
    Encode(#[from] FrameEncodeError),
}
