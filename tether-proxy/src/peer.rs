//! TCP peer connections: a reader task turning frames into session events and a
//! writer task draining queued frames. Writes never block the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tether_core::protocol::{self, ClientIdentity, ConnectionState, PacketMeta};
use tether_core::wire::{self, LEN_SIZE};
use tether_core::{
    decode_frame, encode_packet, Connection, ConnectionError, SessionEvent, Side, TransportError,
    UpstreamFactory,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

enum Outbound {
    Frame(Vec<u8>),
    End(Option<String>),
}

/// One side of a session. Frames are queued to the writer task in submit order.
pub struct PeerConnection {
    side: Side,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: EventSender,
    ended: AtomicBool,
}

impl PeerConnection {
    fn queued(side: Side, events: EventSender) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            side,
            outbound,
            events,
            ended: AtomicBool::new(false),
        });
        (conn, rx)
    }

    /// Wrap an already connected stream and start its reader and writer.
    pub fn spawn(side: Side, stream: TcpStream, events: EventSender) -> Arc<Self> {
        let (conn, rx) = Self::queued(side, events.clone());
        start(stream, side, rx, events);
        conn
    }
}

impl Connection for PeerConnection {
    fn write_raw(&self, bytes: Vec<u8>) {
        let _ = self.outbound.send(Outbound::Frame(bytes));
    }

    fn write(&self, meta: &PacketMeta, fields: &Value) {
        match encode_packet(meta, fields) {
            Ok(frame) => self.write_raw(frame),
            Err(e) => {
                let _ = self.events.send(SessionEvent::Error {
                    side: self.side,
                    error: e.into(),
                });
            }
        }
    }

    fn end(&self, reason: Option<&str>) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound.send(Outbound::End(reason.map(str::to_string)));
    }
}

fn start(
    stream: TcpStream,
    side: Side,
    rx: mpsc::UnboundedReceiver<Outbound>,
    events: EventSender,
) {
    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();
    let closed = Arc::new(Notify::new());
    tokio::spawn(write_loop(writer, side, rx, events.clone(), closed.clone()));
    tokio::spawn(read_loop(reader, side, events, closed));
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    side: Side,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    events: EventSender,
    closed: Arc<Notify>,
) {
    while let Some(out) = rx.recv().await {
        match out {
            Outbound::Frame(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    let _ = events.send(SessionEvent::Error {
                        side,
                        error: e.into(),
                    });
                    break;
                }
            }
            Outbound::End(reason) => {
                if let (Side::Client, Some(reason)) = (side, reason) {
                    let kick = PacketMeta::play(protocol::KICK_DISCONNECT);
                    if let Ok(frame) = encode_packet(&kick, &protocol::kick_reason(&reason)) {
                        let _ = writer.write_all(&frame).await;
                    }
                }
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
    closed.notify_one();
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    side: Side,
    events: EventSender,
    closed: Arc<Notify>,
) {
    let reason = loop {
        tokio::select! {
            frame = read_frame(&mut reader) => match frame {
                Ok(Some(bytes)) => match decode_frame(&bytes) {
                    Ok((packet, _)) => {
                        if events.send(SessionEvent::Packet { from: side, packet }).is_err() {
                            return;
                        }
                    }
                    // Length prefix was intact, so the stream is still in sync.
                    Err(e) => {
                        let _ = events.send(SessionEvent::Error { side, error: e.into() });
                    }
                },
                Ok(None) => break None,
                Err(error) => {
                    let reason = error.to_string();
                    let _ = events.send(SessionEvent::Error { side, error });
                    break Some(reason);
                }
            },
            _ = closed.notified() => break None,
        }
    };
    let _ = events.send(SessionEvent::End { side, reason });
}

/// Read one whole frame (prefix included). `None` on a clean close.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, TransportError> {
    let mut prefix = [0u8; LEN_SIZE];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = wire::frame_len(prefix)?;
    let mut frame = vec![0u8; LEN_SIZE + len];
    frame[..LEN_SIZE].copy_from_slice(&prefix);
    reader.read_exact(&mut frame[LEN_SIZE..]).await?;
    Ok(Some(frame))
}

/// Opens upstream connections over TCP. Connecting happens in the background;
/// frames written meanwhile are queued behind the login frame.
pub struct TcpUpstream {
    host: String,
    port: u16,
    events: EventSender,
}

impl TcpUpstream {
    pub fn new(host: impl Into<String>, port: u16, events: EventSender) -> Self {
        Self {
            host: host.into(),
            port,
            events,
        }
    }
}

impl UpstreamFactory for TcpUpstream {
    fn open(&self, identity: &ClientIdentity) -> Result<Arc<dyn Connection>, ConnectionError> {
        if self.host.trim().is_empty() || self.port == 0 {
            return Err(ConnectionError::InvalidAddress(format!(
                "{}:{}",
                self.host, self.port
            )));
        }
        let login = encode_packet(
            &PacketMeta::new(protocol::LOGIN_START, ConnectionState::Login),
            &identity.login_start_fields(),
        )
        .map_err(ConnectionError::Login)?;
        let (conn, rx) = PeerConnection::queued(Side::Upstream, self.events.clone());
        let (host, port, events) = (self.host.clone(), self.port, self.events.clone());
        tokio::spawn(async move {
            let connected = async {
                let mut stream = TcpStream::connect((host.as_str(), port)).await?;
                stream.write_all(&login).await?;
                Ok::<_, std::io::Error>(stream)
            };
            match connected.await {
                Ok(stream) => start(stream, Side::Upstream, rx, events),
                Err(e) => {
                    let reason = format!("failed to connect to {}:{}: {}", host, port, e);
                    let _ = events.send(SessionEvent::Error {
                        side: Side::Upstream,
                        error: e.into(),
                    });
                    let _ = events.send(SessionEvent::End {
                        side: Side::Upstream,
                        reason: Some(reason),
                    });
                }
            }
        });
        Ok(conn)
    }
}
