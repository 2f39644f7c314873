//! Relay listener: accept game clients, read their login, open an upstream
//! connection and drive one `Session` per client on its own task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use tether_core::protocol::{self, ClientIdentity};
use tether_core::{
    decode_frame, Collaborator, Connection, Diagnostics, Flow, Session, SessionContext,
    SessionId, SessionTable, Side,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::peer::{read_frame, PeerConnection, TcpUpstream};

/// Shared state of the running relay.
pub struct Relay {
    upstream_host: String,
    upstream_port: u16,
    pub registry: Arc<SessionTable>,
    diagnostics: Arc<dyn Diagnostics>,
    collaborators: Vec<Arc<dyn Collaborator>>,
    next_id: AtomicU64,
}

impl Relay {
    pub fn new(
        upstream_host: impl Into<String>,
        upstream_port: u16,
        diagnostics: Arc<dyn Diagnostics>,
        collaborators: Vec<Arc<dyn Collaborator>>,
    ) -> Self {
        Self {
            upstream_host: upstream_host.into(),
            upstream_port,
            registry: Arc::new(SessionTable::new()),
            diagnostics,
            collaborators,
            next_id: AtomicU64::new(1),
        }
    }

    fn context(&self) -> SessionContext {
        SessionContext {
            registry: self.registry.clone(),
            diagnostics: self.diagnostics.clone(),
        }
    }
}

/// Accept clients forever; each one gets its own task.
pub async fn run_proxy(listener: TcpListener, relay: Arc<Relay>) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let relay = relay.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, peer, relay).await {
                tracing::warn!(%peer, "client dropped: {:#}", e);
            }
        });
    }
}

async fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    relay: Arc<Relay>,
) -> anyhow::Result<()> {
    let first = read_frame(&mut stream)
        .await?
        .context("closed before login")?;
    let (login, _) = decode_frame(&first)?;
    if login.meta.name != protocol::LOGIN_START {
        bail!("expected {}, got {}", protocol::LOGIN_START, login.meta.name);
    }
    let identity =
        ClientIdentity::from_login_start(&login.fields).context("malformed login_start")?;
    tracing::debug!(%peer, username = %identity.username, uuid = %identity.trimmed_uuid(), "client login");

    let id = SessionId(relay.next_id.fetch_add(1, Ordering::Relaxed));
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let client = PeerConnection::spawn(Side::Client, stream, events_tx.clone());
    let factory = TcpUpstream::new(relay.upstream_host.clone(), relay.upstream_port, events_tx);

    let mut session = match Session::create(id, identity, client.clone(), &factory, &relay.context())
    {
        Ok(session) => session,
        Err(e) => {
            let message = format!("§cProxy could not reach upstream: §r{}", e);
            client.end(Some(message.as_str()));
            return Err(e.into());
        }
    };
    drop(factory);
    for collaborator in &relay.collaborators {
        session.attach(collaborator.as_ref());
    }

    while let Some(event) = events.recv().await {
        if session.on_event(event) == Flow::Stop {
            break;
        }
    }
    session.handle().client().end(None);
    session.handle().upstream().end(None);
    Ok(())
}
