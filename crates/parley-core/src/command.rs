//! Validated inbound events.
//!
//! A [`Command`] is an [`InboundEvent`] whose required fields are all present
//! and non-empty. Events that fail this check are dropped without a reply:
//! clients get no error, and nothing changes.

use crate::room::{Identity, RoomName};
use parley_protocol::{InboundEvent, MembershipPayload, SendMessagePayload, TypingPayload};
use serde_json::Value;

/// A routable request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Join {
        room: RoomName,
        identity: Identity,
    },
    Leave {
        room: RoomName,
        identity: Identity,
    },
    SendMessage {
        room: RoomName,
        identity: Identity,
        message: String,
        effect: Option<Value>,
        enc: Option<bool>,
        iv: Option<Value>,
    },
    Typing {
        room: RoomName,
        identity: Identity,
        typing: bool,
    },
    VotePersistence {
        room: RoomName,
        identity: Identity,
    },
    RequestDestroy {
        room: RoomName,
        identity: Identity,
    },
}

impl Command {
    /// Validate an inbound event.
    ///
    /// Returns `None` for malformed events and for transport-level events
    /// such as `ping`, which the router does not handle.
    #[must_use]
    pub fn parse(event: InboundEvent) -> Option<Self> {
        match event {
            InboundEvent::Join(payload) => {
                let (room, identity) = membership(payload)?;
                Some(Command::Join { room, identity })
            }
            InboundEvent::Leave(payload) => {
                let (room, identity) = membership(payload)?;
                Some(Command::Leave { room, identity })
            }
            InboundEvent::SendMessage(SendMessagePayload {
                room,
                username,
                message,
                effect,
                enc,
                iv,
            }) => Some(Command::SendMessage {
                room: required(room)?,
                identity: required(username)?,
                message: required(message)?,
                effect,
                enc,
                iv,
            }),
            InboundEvent::Typing(TypingPayload {
                room,
                username,
                typing,
            }) => Some(Command::Typing {
                room: required(room)?,
                identity: required(username)?,
                typing: typing.unwrap_or(true),
            }),
            InboundEvent::VotePersistence(payload) => {
                let (room, identity) = membership(payload)?;
                Some(Command::VotePersistence { room, identity })
            }
            InboundEvent::RequestDestroy(payload) => {
                let (room, identity) = membership(payload)?;
                Some(Command::RequestDestroy { room, identity })
            }
            InboundEvent::Ping(_) => None,
        }
    }

    /// Get the command name, matching the inbound event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Command::Join { .. } => "join",
            Command::Leave { .. } => "leave",
            Command::SendMessage { .. } => "send_message",
            Command::Typing { .. } => "typing",
            Command::VotePersistence { .. } => "vote_persistence",
            Command::RequestDestroy { .. } => "request_destroy",
        }
    }

    /// Get the target room.
    #[must_use]
    pub fn room(&self) -> &str {
        match self {
            Command::Join { room, .. }
            | Command::Leave { room, .. }
            | Command::SendMessage { room, .. }
            | Command::Typing { room, .. }
            | Command::VotePersistence { room, .. }
            | Command::RequestDestroy { room, .. } => room,
        }
    }

    /// Get the caller's identity.
    #[must_use]
    pub fn identity(&self) -> &str {
        match self {
            Command::Join { identity, .. }
            | Command::Leave { identity, .. }
            | Command::SendMessage { identity, .. }
            | Command::Typing { identity, .. }
            | Command::VotePersistence { identity, .. }
            | Command::RequestDestroy { identity, .. } => identity,
        }
    }
}

fn required(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.is_empty())
}

fn membership(payload: MembershipPayload) -> Option<(RoomName, Identity)> {
    Some((required(payload.room)?, required(payload.username)?))
}
