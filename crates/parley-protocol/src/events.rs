//! Event types for the Parley protocol.
//!
//! Every event travels in an adjacently tagged envelope: the `event` field
//! names the event and `data` carries its payload. Inbound payload fields are
//! all optional here; deciding which ones are required is left to the router,
//! so a half-filled payload still decodes and can be dropped quietly later.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current protocol version, announced in the `connected` event.
pub const PROTOCOL_VERSION: u8 = 1;

/// Display name used for server-generated chat messages.
pub const SYSTEM_USER: &str = "System";

/// Payload shared by `join`, `leave`, `vote_persistence` and `request_destroy`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipPayload {
    /// Room name.
    pub room: Option<String>,
    /// Caller-supplied display name.
    pub username: Option<String>,
}

impl MembershipPayload {
    /// Create a payload with both fields set.
    #[must_use]
    pub fn new(room: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            room: Some(room.into()),
            username: Some(username.into()),
        }
    }
}

/// Payload of `send_message`.
///
/// `effect`, `enc` and `iv` belong to the clients (visual effects and
/// end-to-end encryption parameters) and are relayed untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendMessagePayload {
    pub room: Option<String>,
    pub username: Option<String>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enc: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<Value>,
}

/// Payload of `typing`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingPayload {
    pub room: Option<String>,
    pub username: Option<String>,
    /// Absent means `true`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typing: Option<bool>,
}

/// Payload of `ping` and `pong`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// An event sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Enter a room.
    Join(MembershipPayload),
    /// Leave a room.
    Leave(MembershipPayload),
    /// Post a chat message to a room.
    SendMessage(SendMessagePayload),
    /// Typing indicator.
    Typing(TypingPayload),
    /// Vote to keep message history.
    VotePersistence(MembershipPayload),
    /// Ask every client in the room to discard its history.
    RequestDestroy(MembershipPayload),
    /// Keepalive, answered by the transport.
    Ping(PingPayload),
}

impl InboundEvent {
    /// Event name as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Join(_) => "join",
            InboundEvent::Leave(_) => "leave",
            InboundEvent::SendMessage(_) => "send_message",
            InboundEvent::Typing(_) => "typing",
            InboundEvent::VotePersistence(_) => "vote_persistence",
            InboundEvent::RequestDestroy(_) => "request_destroy",
            InboundEvent::Ping(_) => "ping",
        }
    }
}

/// A chat message as delivered to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<Value>,
}

impl ChatMessage {
    /// A plain message from the server itself.
    #[must_use]
    pub fn system(message: impl Into<String>) -> Self {
        Self {
            user: SYSTEM_USER.to_string(),
            message: message.into(),
            effect: None,
            enc: None,
            iv: None,
        }
    }

    /// Whether this message was generated by the server.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.user == SYSTEM_USER
    }
}

/// Snapshot of a room's persistence vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceState {
    /// Whether history persistence is on.
    pub enabled: bool,
    /// Number of outstanding votes.
    pub votes: usize,
    /// Number of members present.
    pub total: usize,
}

/// An event sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Current members of a room.
    UserList(Vec<String>),
    /// Chat or system message.
    Message(ChatMessage),
    /// Persistence vote progress.
    PersistenceState(PersistenceState),
    /// Someone is typing.
    Typing { user: String },
    /// Discard local history.
    DestroyMessages { by: String },
    /// Connection established.
    Connected {
        connection_id: String,
        version: u8,
        /// Recommended ping interval in milliseconds.
        heartbeat: u32,
    },
    /// Keepalive reply.
    Pong(PingPayload),
}

impl OutboundEvent {
    /// Event name as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::UserList(_) => "user_list",
            OutboundEvent::Message(_) => "message",
            OutboundEvent::PersistenceState(_) => "persistence_state",
            OutboundEvent::Typing { .. } => "typing",
            OutboundEvent::DestroyMessages { .. } => "destroy_messages",
            OutboundEvent::Connected { .. } => "connected",
            OutboundEvent::Pong(_) => "pong",
        }
    }

    /// Create a system message event.
    #[must_use]
    pub fn system_message(message: impl Into<String>) -> Self {
        OutboundEvent::Message(ChatMessage::system(message))
    }

    /// Create a connected event.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, heartbeat: u32) -> Self {
        OutboundEvent::Connected {
            connection_id: connection_id.into(),
            version: PROTOCOL_VERSION,
            heartbeat,
        }
    }
}
