//! Per-session packet relay between a game client and its upstream server.
//! Host-driven: no I/O; the host feeds connection events into a `Session` and
//! supplies the connections the session writes to.

pub mod connection;
pub mod diagnostics;
pub mod logger;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod session;
pub mod transform;
pub mod wire;

#[cfg(test)]
mod test_support;

pub use connection::{
    Connection, ConnectionError, SessionEvent, Side, TransportError, UpstreamFactory,
};
pub use diagnostics::{DiagnosticEvent, Diagnostics, TracingDiagnostics};
pub use logger::PacketLogger;
pub use protocol::{ClientIdentity, ConnectionState, PacketEvent, PacketMeta};
pub use registry::{SessionRegistry, SessionTable};
pub use relay::{Direction, DropReason, Forward};
pub use session::{Collaborator, Flow, Session, SessionContext, SessionHandle, SessionId};
pub use transform::{Chain, TransformResult, Transformer};
pub use wire::{decode_frame, encode_packet, FrameDecodeError, FrameEncodeError};
