//! Session: one client connection, its upstream connection, the two transformer
//! chains and the `Active -> Destroyed` lifecycle.
//!
//! The session is driven by its owner: every inbound event from either connection
//! goes through `Session::on_event`, in arrival order, on one task. Nothing here
//! blocks; all writes are submitted to the connections and not awaited.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::connection::{
    Connection, ConnectionError, SessionEvent, Side, TransportError, UpstreamFactory,
};
use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::protocol::{self, ChatPosition, ClientIdentity, PacketEvent, PacketMeta};
use crate::registry::SessionRegistry;
use crate::relay::{self, Direction, DropReason, Forward};
use crate::transform::{Chain, Transformer};

/// Substituted when the upstream ends without saying why.
pub const NO_REASON: &str = "<no reason provided>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message shown to the client when the upstream goes away.
pub fn upstream_lost_message(reason: &str) -> String {
    format!("§cProxy lost connection to upstream: §r{}", reason)
}

/// Cloneable view of a session's connections. Stored in the registry and handed
/// to collaborators that need to send later.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    label: Arc<str>,
    client: Arc<dyn Connection>,
    upstream: Arc<dyn Connection>,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        label: impl Into<Arc<str>>,
        client: Arc<dyn Connection>,
        upstream: Arc<dyn Connection>,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            client,
            upstream,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn client(&self) -> &Arc<dyn Connection> {
        &self.client
    }

    pub fn upstream(&self) -> &Arc<dyn Connection> {
        &self.upstream
    }

    /// Chat line to the client (position 1).
    pub fn send_client_message(&self, content: &Value) {
        self.client.write(
            &PacketMeta::play(protocol::CHAT),
            &protocol::chat_display(content, ChatPosition::Chat),
        );
    }

    /// Action bar text to the client (position 2).
    pub fn send_client_action_bar(&self, content: &Value) {
        self.client.write(
            &PacketMeta::play(protocol::CHAT),
            &protocol::chat_display(content, ChatPosition::ActionBar),
        );
    }

    /// Run `/text` upstream.
    pub fn send_server_command(&self, text: &str) {
        self.upstream
            .write(&PacketMeta::play(protocol::CHAT), &protocol::chat_command(text));
    }

    /// End the client connection with `reason`.
    pub fn kick(&self, reason: &str) {
        self.client.end(Some(reason));
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}

/// Shared services every session reports to.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<dyn SessionRegistry>,
    pub diagnostics: Arc<dyn Diagnostics>,
}

/// A module that plugs into every session: registers transformers, subscribes to
/// destroy, keeps a `SessionHandle` for later sends.
pub trait Collaborator: Send + Sync {
    fn attach(&self, session: &mut Session);
}

/// Whether the owner should keep feeding events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

type DestroyListener = Box<dyn FnOnce(SessionId) + Send>;

pub struct Session {
    handle: SessionHandle,
    identity: ClientIdentity,
    outgoing: Chain,
    incoming: Chain,
    destroy_listeners: Vec<DestroyListener>,
    registry: Arc<dyn SessionRegistry>,
    diagnostics: Arc<dyn Diagnostics>,
    destroyed: bool,
    rejection_relayed: bool,
}

impl Session {
    /// Open the upstream connection for `identity` and register the session.
    /// Nothing is registered if the upstream cannot be constructed.
    pub fn create(
        id: SessionId,
        identity: ClientIdentity,
        client: Arc<dyn Connection>,
        factory: &dyn UpstreamFactory,
        ctx: &SessionContext,
    ) -> Result<Self, ConnectionError> {
        let upstream = factory.open(&identity)?;
        let label = format!("[Session {} - {}]", id, identity.username);
        let handle = SessionHandle::new(id, label, client, upstream);
        ctx.registry.register(id, handle.clone());
        let session = Self {
            handle,
            identity,
            outgoing: Chain::new(),
            incoming: Chain::new(),
            destroy_listeners: Vec::new(),
            registry: ctx.registry.clone(),
            diagnostics: ctx.diagnostics.clone(),
            destroyed: false,
            rejection_relayed: false,
        };
        session.report(&DiagnosticEvent::Created);
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.handle.id
    }

    pub fn label(&self) -> &str {
        self.handle.label()
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn attach(&mut self, collaborator: &dyn Collaborator) {
        collaborator.attach(self);
    }

    /// Append to the client -> upstream chain.
    pub fn add_outgoing_transformer(&mut self, transformer: impl Transformer + 'static) {
        self.outgoing.push(transformer);
    }

    /// Append to the upstream -> client chain.
    pub fn add_incoming_transformer(&mut self, transformer: impl Transformer + 'static) {
        self.incoming.push(transformer);
    }

    /// Run `listener` once when the session is destroyed (immediately if it already is).
    pub fn on_destroy(&mut self, listener: impl FnOnce(SessionId) + Send + 'static) {
        if self.destroyed {
            listener(self.handle.id);
            return;
        }
        self.destroy_listeners.push(Box::new(listener));
    }

    pub fn send_client_message(&self, content: &Value) {
        self.handle.send_client_message(content);
    }

    pub fn send_client_action_bar(&self, content: &Value) {
        self.handle.send_client_action_bar(content);
    }

    pub fn send_server_command(&self, text: &str) {
        self.handle.send_server_command(text);
    }

    /// Dispatch one inbound event. Events after destroy are ignored.
    pub fn on_event(&mut self, event: SessionEvent) -> Flow {
        if self.destroyed {
            return Flow::Stop;
        }
        match event {
            SessionEvent::Packet {
                from: Side::Client,
                packet,
            } => self.relay(packet, Direction::Outgoing),
            SessionEvent::Packet {
                from: Side::Upstream,
                packet,
            } => {
                if is_rejection(&packet.meta) {
                    self.relay_rejection(&packet.fields);
                    self.relay_as(packet, Direction::Incoming, true);
                } else {
                    self.relay(packet, Direction::Incoming);
                }
            }
            SessionEvent::End {
                side: Side::Client, ..
            } => self.on_client_end(),
            SessionEvent::End {
                side: Side::Upstream,
                reason,
            } => self.on_upstream_end(reason.as_deref()),
            SessionEvent::Error { side, error } => self.on_transport_error(side, &error),
        }
        if self.destroyed {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    /// Mark destroyed, leave the registry, notify listeners. Only the first call does anything.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        let id = self.handle.id;
        self.registry.unregister(id);
        self.report(&DiagnosticEvent::Destroyed);
        for listener in std::mem::take(&mut self.destroy_listeners) {
            listener(id);
        }
    }

    fn relay(&mut self, packet: PacketEvent, direction: Direction) {
        self.relay_as(packet, direction, false);
    }

    /// Run the chain and deliver. A packet already sent on as the rejection kick
    /// still goes through the chain but is never forwarded a second time.
    fn relay_as(&mut self, packet: PacketEvent, direction: Direction, kicked: bool) {
        let name = packet.meta.name.clone();
        let chain = match direction {
            Direction::Outgoing => &mut self.outgoing,
            Direction::Incoming => &mut self.incoming,
        };
        let mut forward = relay::process(chain, packet, direction);
        if kicked && !matches!(forward, Forward::Drop(_)) {
            forward = Forward::Drop(DropReason::RelayedAsKick);
        }
        self.report(&DiagnosticEvent::Forwarded {
            name: &name,
            direction,
            decision: &forward,
        });
        let destination = match direction {
            Direction::Outgoing => &self.handle.upstream,
            Direction::Incoming => &self.handle.client,
        };
        relay::deliver(forward, destination.as_ref());
    }

    fn on_client_end(&mut self) {
        self.handle.upstream.end(None);
        self.destroy();
    }

    fn on_upstream_end(&mut self, reason: Option<&str>) {
        let reason = reason.unwrap_or(NO_REASON);
        self.report(&DiagnosticEvent::UpstreamEnded { reason });
        let message = upstream_lost_message(reason);
        self.handle.client.end(Some(message.as_str()));
        // Ending the client converges on the client-end path.
        self.on_client_end();
    }

    fn on_transport_error(&self, side: Side, error: &TransportError) {
        self.report(&DiagnosticEvent::TransportError { side, error });
    }

    /// Forward a pre-play upstream rejection to the client untouched, once.
    fn relay_rejection(&mut self, payload: &Value) {
        if self.rejection_relayed {
            return;
        }
        self.rejection_relayed = true;
        self.report_rejection(payload);
        self.handle
            .client
            .write(&PacketMeta::play(protocol::KICK_DISCONNECT), payload);
    }

    fn report_rejection(&self, payload: &Value) {
        if payload.is_null() {
            self.report(&DiagnosticEvent::RejectionEmpty);
            return;
        }
        match payload.get("reason") {
            Some(Value::String(reason)) if !reason.is_empty() => {
                self.report(&DiagnosticEvent::RejectionRaw { reason });
                match serde_json::from_str::<Value>(reason) {
                    Ok(parsed) => {
                        let pretty = serde_json::to_string_pretty(&parsed)
                            .unwrap_or_else(|_| parsed.to_string());
                        self.report(&DiagnosticEvent::RejectionParsed { pretty: &pretty });
                    }
                    Err(e) => {
                        self.report(&DiagnosticEvent::RejectionUnparsable {
                            error: &e.to_string(),
                        });
                    }
                }
            }
            None | Some(Value::Null) | Some(Value::String(_)) => {
                self.report(&DiagnosticEvent::RejectionWithoutReason { payload });
            }
            Some(reason) => self.report(&DiagnosticEvent::RejectionNonString { reason }),
        }
    }

    fn report(&self, event: &DiagnosticEvent<'_>) {
        self.diagnostics.record(self.handle.label(), event);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.handle.id)
            .field("label", &self.handle.label)
            .field("outgoing", &self.outgoing)
            .field("incoming", &self.incoming)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn is_rejection(meta: &PacketMeta) -> bool {
    meta.name == protocol::LOGIN_DISCONNECT && !meta.state.is_play()
}
