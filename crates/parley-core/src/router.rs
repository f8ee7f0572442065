//! Event routing for Parley.
//!
//! The router turns each inbound event into room state changes plus an
//! ordered list of outbound events. It processes one event at a time to
//! completion; callers must serialize access (the router takes `&mut self`).

use crate::command::Command;
use crate::delivery::Outbound;
use crate::presence::LeaveOutcome;
use crate::store::{RoomStore, StoreStats};
use parley_protocol::{ChatMessage, InboundEvent, OutboundEvent};
use serde_json::Value;
use tracing::{debug, info, trace};

/// System message sent when a room's vote completes.
pub const PERSISTENCE_ENABLED_NOTICE: &str = "Persistence now enabled.";

/// Routes inbound events against an owned [`RoomStore`].
#[derive(Debug, Default)]
pub struct EventRouter {
    store: RoomStore,
}

impl EventRouter {
    /// Create a router with an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a router over an existing store.
    #[must_use]
    pub fn with_store(store: RoomStore) -> Self {
        Self { store }
    }

    /// Read-only view of the room table.
    #[must_use]
    pub fn store(&self) -> &RoomStore {
        &self.store
    }

    /// Give back the room table.
    #[must_use]
    pub fn into_store(self) -> RoomStore {
        self.store
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Validate and route an inbound event.
    ///
    /// Malformed events produce no output.
    pub fn handle(&mut self, event: InboundEvent) -> Vec<Outbound> {
        let name = event.name();
        match Command::parse(event) {
            Some(command) => self.dispatch(command),
            None => {
                debug!(event = name, "Dropped malformed event");
                Vec::new()
            }
        }
    }

    /// Route a validated command.
    pub fn dispatch(&mut self, command: Command) -> Vec<Outbound> {
        let name = command.name();
        let out = match command {
            Command::Join { room, identity } => self.on_join(room, &identity),
            Command::Leave { room, identity } => self.on_leave(room, &identity),
            Command::SendMessage {
                room,
                identity,
                message,
                effect,
                enc,
                iv,
            } => on_send_message(room, identity, message, effect, enc, iv),
            Command::Typing {
                room,
                identity,
                typing,
            } => on_typing(room, identity, typing),
            Command::VotePersistence { room, identity } => self.on_vote(room, &identity),
            Command::RequestDestroy { room, identity } => self.on_request_destroy(room, identity),
        };

        trace!(event = name, outbound = out.len(), "Routed");
        out
    }

    fn on_join(&mut self, room: String, identity: &str) -> Vec<Outbound> {
        let joined = self.store.join(&room, identity);

        vec![
            Outbound::to_room(&room, OutboundEvent::UserList(joined.members)),
            Outbound::to_room(
                &room,
                OutboundEvent::system_message(format!("{identity} has joined!")),
            ),
            Outbound::to_room(room, OutboundEvent::PersistenceState(joined.state)),
        ]
    }

    fn on_leave(&mut self, room: String, identity: &str) -> Vec<Outbound> {
        let Some(left) = self.store.leave(&room, identity) else {
            debug!(room = %room, user = %identity, "Leave from non-member ignored");
            return Vec::new();
        };

        let mut out = vec![
            Outbound::to_room(&room, OutboundEvent::UserList(left.members().to_vec())),
            Outbound::to_room(
                &room,
                OutboundEvent::system_message(format!("{identity} has left.")),
            ),
        ];

        match left {
            LeaveOutcome::Remaining { state, .. } => {
                out.push(Outbound::to_room(room, OutboundEvent::PersistenceState(state)));
            }
            LeaveOutcome::RoomDeleted => {
                debug!(room = %room, "Last member left");
            }
        }

        out
    }

    fn on_vote(&mut self, room: String, identity: &str) -> Vec<Outbound> {
        let Some(outcome) = self.store.cast_vote(&room, identity) else {
            return Vec::new();
        };

        let mut out = vec![Outbound::to_room(
            &room,
            OutboundEvent::PersistenceState(outcome.state()),
        )];

        if outcome.just_enabled() {
            out.push(Outbound::to_room(
                room,
                OutboundEvent::system_message(PERSISTENCE_ENABLED_NOTICE),
            ));
        }

        out
    }

    fn on_request_destroy(&self, room: String, identity: String) -> Vec<Outbound> {
        if !self.store.request_destroy_signal(&room, &identity) {
            return Vec::new();
        }

        info!(room = %room, by = %identity, "Destroy signal issued");
        vec![Outbound::to_room(
            room,
            OutboundEvent::DestroyMessages { by: identity },
        )]
    }
}

fn on_send_message(
    room: String,
    identity: String,
    message: String,
    effect: Option<Value>,
    enc: Option<bool>,
    iv: Option<Value>,
) -> Vec<Outbound> {
    debug!(room = %room, user = %identity, encrypted = enc.unwrap_or(false), "Message");

    vec![Outbound::to_room(
        room,
        OutboundEvent::Message(ChatMessage {
            user: identity,
            message,
            effect,
            enc,
            iv,
        }),
    )]
}

// TODO: a `typing: false` stop signal is accepted but not relayed; wire it to
// an outbound stop-typing event once clients handle one.
fn on_typing(room: String, identity: String, typing: bool) -> Vec<Outbound> {
    if !typing {
        return Vec::new();
    }

    vec![Outbound::to_others(
        room,
        OutboundEvent::Typing { user: identity },
    )]
}
