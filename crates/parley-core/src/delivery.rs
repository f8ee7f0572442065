//! Outbound events and who receives them.

use crate::room::RoomName;
use crate::router::PERSISTENCE_ENABLED_NOTICE;
use parley_protocol::OutboundEvent;

/// Which connections an outbound event goes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeliveryScope {
    /// Every connection in the room.
    Room(RoomName),
    /// Every connection in the room except the one that sent the request.
    RoomExceptSender(RoomName),
}

impl DeliveryScope {
    /// Get the target room.
    #[must_use]
    pub fn room(&self) -> &str {
        match self {
            DeliveryScope::Room(room) | DeliveryScope::RoomExceptSender(room) => room,
        }
    }

    /// Whether the sending connection receives the event.
    #[must_use]
    pub fn includes_sender(&self) -> bool {
        matches!(self, DeliveryScope::Room(_))
    }
}

/// An outbound event ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// Who receives it.
    pub scope: DeliveryScope,
    /// What they receive.
    pub event: OutboundEvent,
}

impl Outbound {
    /// Deliver to the whole room.
    #[must_use]
    pub fn to_room(room: impl Into<RoomName>, event: OutboundEvent) -> Self {
        Self {
            scope: DeliveryScope::Room(room.into()),
            event,
        }
    }

    /// Deliver to everyone in the room but the sender.
    #[must_use]
    pub fn to_others(room: impl Into<RoomName>, event: OutboundEvent) -> Self {
        Self {
            scope: DeliveryScope::RoomExceptSender(room.into()),
            event,
        }
    }

    /// Whether this is the notice sent when a room's vote completes.
    #[must_use]
    pub fn announces_persistence(&self) -> bool {
        matches!(
            &self.event,
            OutboundEvent::Message(message)
                if message.is_system() && message.message == PERSISTENCE_ENABLED_NOTICE
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_announces_persistence() {
        let notice = Outbound::to_room("r", OutboundEvent::system_message(PERSISTENCE_ENABLED_NOTICE));
        assert!(notice.announces_persistence());

        let joined = Outbound::to_room("r", OutboundEvent::system_message("alice has joined!"));
        assert!(!joined.announces_persistence());

        let state = Outbound::to_room(
            "r",
            OutboundEvent::PersistenceState(parley_protocol::PersistenceState {
                enabled: true,
                votes: 0,
                total: 1,
            }),
        );
        assert!(!state.announces_persistence());
    }
}
