//! Relay pipeline: run one packet through a chain and decide how to forward it.

use std::fmt;

use serde_json::Value;

use crate::connection::{Connection, Side};
use crate::protocol::{ConnectionState, PacketEvent, PacketMeta};
use crate::transform::{Chain, TransformResult};

/// Direction a packet travels through the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to upstream.
    Outgoing,
    /// Upstream to client.
    Incoming,
}

impl Direction {
    pub fn source(self) -> Side {
        match self {
            Direction::Outgoing => Side::Client,
            Direction::Incoming => Side::Upstream,
        }
    }

    pub fn destination(self) -> Side {
        match self {
            Direction::Outgoing => Side::Upstream,
            Direction::Incoming => Side::Client,
        }
    }

    /// Only packets in the play state may reach the client.
    fn admits(self, state: ConnectionState) -> bool {
        match self {
            Direction::Outgoing => true,
            Direction::Incoming => state.is_play(),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source(), self.destination())
    }
}

/// What to do with a packet after its chain ran.
#[derive(Debug, Clone, PartialEq)]
pub enum Forward {
    /// Untouched: forward the received bytes as-is.
    Raw(Vec<u8>),
    /// Some transformer replaced the content: re-encode.
    Encoded { meta: PacketMeta, fields: Value },
    Drop(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Cancelled,
    NotInGame(ConnectionState),
    /// Already sent to the client as a kick.
    RelayedAsKick,
}

impl fmt::Display for Forward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Forward::Raw(bytes) => write!(f, "forwarded {} bytes unchanged", bytes.len()),
            Forward::Encoded { meta, .. } => write!(f, "re-encoded as {}", meta.name),
            Forward::Drop(DropReason::Cancelled) => f.write_str("dropped, cancelled"),
            Forward::Drop(DropReason::NotInGame(state)) => {
                write!(f, "dropped, not in game ({:?})", state)
            }
            Forward::Drop(DropReason::RelayedAsKick) => f.write_str("dropped, relayed as kick"),
        }
    }
}

/// Apply `chain` to `packet` in registration order.
///
/// `Cancel` stops everything. `Replace` updates the current fields/meta, which the
/// remaining transformers then observe. The incoming direction drops anything that
/// is not in the play state after the chain ran. Unmodified packets keep their raw
/// bytes, moved rather than copied.
pub fn process(chain: &mut Chain, packet: PacketEvent, direction: Direction) -> Forward {
    let PacketEvent {
        mut meta,
        mut fields,
        raw,
    } = packet;
    let mut modified = false;
    for transformer in chain.iter_mut() {
        match transformer.transform(&fields, &meta) {
            TransformResult::Pass => {}
            TransformResult::Cancel => return Forward::Drop(DropReason::Cancelled),
            TransformResult::Replace {
                fields: new_fields,
                meta: new_meta,
            } => {
                fields = new_fields;
                meta = new_meta;
                modified = true;
            }
        }
    }
    if !direction.admits(meta.state) {
        return Forward::Drop(DropReason::NotInGame(meta.state));
    }
    if modified {
        Forward::Encoded { meta, fields }
    } else {
        Forward::Raw(raw)
    }
}

/// Submit a forwarding decision to the destination connection. Does not wait.
pub fn deliver(forward: Forward, destination: &dyn Connection) {
    match forward {
        Forward::Raw(bytes) => destination.write_raw(bytes),
        Forward::Encoded { meta, fields } => destination.write(&meta, &fields),
        Forward::Drop(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn packet(name: &str, state: ConnectionState, fields: Value) -> PacketEvent {
        PacketEvent {
            meta: PacketMeta::new(name, state),
            fields,
            raw: vec![0xde, 0xad, 0xbe, 0xef, name.len() as u8],
        }
    }

    fn play(name: &str, fields: Value) -> PacketEvent {
        packet(name, ConnectionState::Play, fields)
    }

    #[test]
    fn empty_chain_passes_raw_bytes() {
        let mut chain = Chain::new();
        let p = play("chat", json!({ "message": "hello" }));
        let raw = p.raw.clone();
        assert_eq!(process(&mut chain, p, Direction::Outgoing), Forward::Raw(raw));
    }

    #[test]
    fn pass_only_chain_keeps_raw_bytes() {
        let mut chain = Chain::new();
        chain.push(|_: &Value, _: &PacketMeta| TransformResult::Pass);
        chain.push(|_: &Value, _: &PacketMeta| TransformResult::Pass);
        let p = play("position", json!({ "x": 1 }));
        let raw = p.raw.clone();
        assert_eq!(process(&mut chain, p, Direction::Incoming), Forward::Raw(raw));
    }

    #[test]
    fn cancel_short_circuits_the_chain() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut chain = Chain::new();
        for (i, result) in [
            TransformResult::replace(json!({ "message": "x" }), PacketMeta::play("chat")),
            TransformResult::Cancel,
            TransformResult::Pass,
        ]
        .into_iter()
        .enumerate()
        {
            let calls = calls.clone();
            chain.push(move |_: &Value, _: &PacketMeta| {
                calls.lock().unwrap().push(i);
                result.clone()
            });
        }
        let forward = process(&mut chain, play("chat", json!({})), Direction::Outgoing);
        assert_eq!(forward, Forward::Drop(DropReason::Cancelled));
        assert_eq!(*calls.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn replace_is_visible_to_later_transformers() {
        let seen = Arc::new(Mutex::new(None));
        let mut chain = Chain::new();
        chain.push(|_: &Value, meta: &PacketMeta| {
            TransformResult::replace(json!({ "message": "X" }), meta.clone())
        });
        let seen_by_second = seen.clone();
        chain.push(move |fields: &Value, _: &PacketMeta| {
            *seen_by_second.lock().unwrap() = Some(fields.clone());
            TransformResult::Pass
        });
        let forward = process(
            &mut chain,
            play("chat", json!({ "message": "hello" })),
            Direction::Outgoing,
        );
        assert_eq!(
            forward,
            Forward::Encoded {
                meta: PacketMeta::play("chat"),
                fields: json!({ "message": "X" }),
            }
        );
        assert_eq!(*seen.lock().unwrap(), Some(json!({ "message": "X" })));
    }

    #[test]
    fn incoming_drops_non_play_state() {
        let mut chain = Chain::new();
        let forward = process(
            &mut chain,
            packet("success", ConnectionState::Login, json!({})),
            Direction::Incoming,
        );
        assert_eq!(
            forward,
            Forward::Drop(DropReason::NotInGame(ConnectionState::Login))
        );
    }

    #[test]
    fn outgoing_forwards_in_any_state() {
        let mut chain = Chain::new();
        let p = packet("login_ack", ConnectionState::Login, json!({}));
        let raw = p.raw.clone();
        assert_eq!(process(&mut chain, p, Direction::Outgoing), Forward::Raw(raw));
    }

    #[test]
    fn gate_uses_state_after_replacement() {
        let mut chain = Chain::new();
        chain.push(|fields: &Value, meta: &PacketMeta| {
            TransformResult::replace(
                fields.clone(),
                PacketMeta::new(meta.name.clone(), ConnectionState::Play),
            )
        });
        let forward = process(
            &mut chain,
            packet("custom", ConnectionState::Configuration, json!({ "a": 1 })),
            Direction::Incoming,
        );
        assert!(matches!(forward, Forward::Encoded { .. }));
    }

    #[test]
    fn directions_swap_endpoints() {
        assert_eq!(Direction::Outgoing.source(), Side::Client);
        assert_eq!(Direction::Outgoing.destination(), Side::Upstream);
        assert_eq!(Direction::Incoming.source(), Side::Upstream);
        assert_eq!(Direction::Incoming.destination(), Side::Client);
        assert_eq!(Direction::Incoming.to_string(), "Upstream -> Client");
    }

    #[test]
    fn decisions_describe_themselves() {
        assert_eq!(
            Forward::Raw(vec![1, 2, 3]).to_string(),
            "forwarded 3 bytes unchanged"
        );
        assert_eq!(
            Forward::Drop(DropReason::NotInGame(ConnectionState::Login)).to_string(),
            "dropped, not in game (Login)"
        );
    }
}
