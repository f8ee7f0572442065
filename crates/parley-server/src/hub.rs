//! Connection hub.
//!
//! The hub knows which sockets are open and which rooms each one listens
//! to, and turns a [`DeliveryScope`] into a set of recipients. Room state
//! itself lives in the core router; the hub only tracks sockets.

use dashmap::{DashMap, DashSet};
use parley_core::{DeliveryScope, Identity, Outbound, RoomName};
use parley_protocol::OutboundEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A connection identifier.
pub type ConnectionId = String;

/// Receiving side of a connection's outbound queue.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Arc<OutboundEvent>>;

/// Registry of open connections and their room subscriptions.
#[derive(Debug, Default)]
pub struct Hub {
    /// Outbound queue per connection.
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<Arc<OutboundEvent>>>,
    /// Connections listening to each room.
    rooms: DashMap<RoomName, DashSet<ConnectionId>>,
    /// Connections speaking for each `(room, identity)`.
    holders: DashMap<(RoomName, Identity), DashSet<ConnectionId>>,
}

impl Hub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of rooms with at least one listening connection.
    #[cfg(test)]
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Register a connection and get its outbound queue.
    pub fn register(&self, connection_id: &str) -> OutboundReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(connection_id.to_string(), tx);
        debug!(connection = %connection_id, "Connection registered");
        rx
    }

    /// Forget a connection and all of its subscriptions.
    pub fn unregister(&self, connection_id: &str) {
        self.connections.remove(connection_id);
        for room in self.rooms.iter() {
            room.value().remove(connection_id);
        }
        self.rooms.retain(|_, listeners| !listeners.is_empty());
        for binding in self.holders.iter() {
            binding.value().remove(connection_id);
        }
        self.holders.retain(|_, holders| !holders.is_empty());
        debug!(connection = %connection_id, "Connection unregistered");
    }

    /// Start delivering a room's events to a connection.
    pub fn subscribe(&self, connection_id: &str, room: &str) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id.to_string());
        trace!(connection = %connection_id, room = %room, "Subscribed");
    }

    /// Stop delivering a room's events to a connection.
    pub fn unsubscribe(&self, connection_id: &str, room: &str) {
        if let Some(listeners) = self.rooms.get(room) {
            listeners.remove(connection_id);
        }
        self.rooms.remove_if(room, |_, listeners| listeners.is_empty());
        trace!(connection = %connection_id, room = %room, "Unsubscribed");
    }

    /// Record that a connection speaks for `identity` in `room`.
    pub fn bind(&self, connection_id: &str, room: &str, identity: &str) {
        self.holders
            .entry((room.to_string(), identity.to_string()))
            .or_default()
            .insert(connection_id.to_string());
    }

    /// Drop a connection's claim on `identity` in `room`.
    ///
    /// Returns `true` if no other connection still speaks for it.
    pub fn release(&self, connection_id: &str, room: &str, identity: &str) -> bool {
        let key = (room.to_string(), identity.to_string());
        if let Some(holders) = self.holders.get(&key) {
            holders.remove(connection_id);
        }
        self.holders.remove_if(&key, |_, holders| holders.is_empty());
        !self.holders.contains_key(&key)
    }

    /// Check whether a connection listens to a room.
    #[cfg(test)]
    #[must_use]
    pub fn is_subscribed(&self, connection_id: &str, room: &str) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|listeners| listeners.contains(connection_id))
    }

    /// Queue an event for a single connection.
    ///
    /// Returns `false` if the connection is gone.
    pub fn send_to(&self, connection_id: &str, event: OutboundEvent) -> bool {
        self.connections
            .get(connection_id)
            .is_some_and(|tx| tx.send(Arc::new(event)).is_ok())
    }

    /// Queue an outbound event for every connection its scope covers.
    ///
    /// `origin` is the connection whose request produced the event.
    /// Returns the number of connections it was queued for.
    pub fn deliver(&self, origin: &str, outbound: &Outbound) -> usize {
        let Some(listeners) = self.rooms.get(outbound.scope.room()) else {
            return 0;
        };

        let skip_origin = matches!(outbound.scope, DeliveryScope::RoomExceptSender(_));
        let event = Arc::new(outbound.event.clone());

        let mut count = 0;
        for connection_id in listeners.iter() {
            if skip_origin && connection_id.as_str() == origin {
                continue;
            }
            if let Some(tx) = self.connections.get(connection_id.as_str()) {
                if tx.send(Arc::clone(&event)).is_ok() {
                    count += 1;
                }
            }
        }

        trace!(
            room = %outbound.scope.room(),
            event = outbound.event.name(),
            recipients = count,
            "Delivered"
        );
        count
    }
}
