//! Packet model shared by the codec, the relay pipeline and collaborators.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Chat-display packet name (both directions).
pub const CHAT: &str = "chat";
/// Play-state kick packet sent to the client.
pub const KICK_DISCONNECT: &str = "kick_disconnect";
/// Login-state rejection sent by the upstream before play begins.
pub const LOGIN_DISCONNECT: &str = "disconnect";
/// First packet on every connection; carries the client identity.
pub const LOGIN_START: &str = "login_start";

/// Connection state a packet was decoded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Handshaking,
    Status,
    Login,
    Configuration,
    /// In-game state. Only packets in this state reach the client on the incoming path.
    Play,
}

impl ConnectionState {
    pub fn is_play(self) -> bool {
        self == ConnectionState::Play
    }
}

/// Packet name plus the state it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketMeta {
    pub name: String,
    pub state: ConnectionState,
}

impl PacketMeta {
    pub fn new(name: impl Into<String>, state: ConnectionState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }

    pub fn play(name: impl Into<String>) -> Self {
        Self::new(name, ConnectionState::Play)
    }
}

/// One decoded packet as received, with its exact wire bytes.
/// `raw` must decode to `(meta, fields)`; nothing edits it in place.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketEvent {
    pub meta: PacketMeta,
    pub fields: Value,
    pub raw: Vec<u8>,
}

/// Who the downstream client is. Handed to the upstream factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub username: String,
    pub uuid: Uuid,
    pub protocol_version: i32,
}

impl ClientIdentity {
    /// Uuid without dashes.
    pub fn trimmed_uuid(&self) -> String {
        self.uuid.simple().to_string()
    }

    /// Build from `login_start` fields: `{ username, uuid, protocol_version }`.
    pub fn from_login_start(fields: &Value) -> Option<Self> {
        let username = fields.get("username")?.as_str()?.to_string();
        if username.is_empty() {
            return None;
        }
        let uuid = fields.get("uuid")?.as_str()?.parse::<Uuid>().ok()?;
        let protocol_version = i32::try_from(fields.get("protocol_version")?.as_i64()?).ok()?;
        Some(Self {
            username,
            uuid,
            protocol_version,
        })
    }

    pub fn login_start_fields(&self) -> Value {
        json!({
            "username": self.username,
            "uuid": self.uuid.hyphenated().to_string(),
            "protocol_version": self.protocol_version,
        })
    }
}

/// `position` discriminator of a chat-display packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPosition {
    Chat = 1,
    ActionBar = 2,
}

/// Chat-display fields addressed to the client. `content` is a text component;
/// it is sent as its JSON text. Sender is always the nil uuid.
pub fn chat_display(content: &Value, position: ChatPosition) -> Value {
    json!({
        "position": position as u8,
        "message": content.to_string(),
        "sender": Uuid::nil().hyphenated().to_string(),
    })
}

/// Chat fields that run `text` as a command upstream. `text` carries no leading slash.
pub fn chat_command(text: &str) -> Value {
    json!({ "message": format!("/{}", text) })
}

/// Kick fields carrying a plain-text reason.
pub fn kick_reason(reason: &str) -> Value {
    json!({ "reason": json!({ "text": reason }).to_string() })
}
