//! The room table.
//!
//! `RoomStore` is the only place room state lives. Rooms enter it through
//! `create` when the first member joins and leave it through `destroy` when
//! the last member leaves; there is no other way in or out.

use crate::room::{Identity, Room, RoomName};
use parley_protocol::PersistenceState;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use tracing::info;

/// Owned table of live rooms.
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: HashMap<RoomName, Room>,
}

impl RoomStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Check if there are no rooms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Check if a room exists.
    #[must_use]
    pub fn contains(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Get a room.
    #[must_use]
    pub fn room(&self, room: &str) -> Option<&Room> {
        self.rooms.get(room)
    }

    /// Get the members of a room.
    #[must_use]
    pub fn members(&self, room: &str) -> Option<&BTreeSet<Identity>> {
        self.rooms.get(room).map(Room::members)
    }

    /// Get the persistence snapshot of a room.
    #[must_use]
    pub fn persistence_state(&self, room: &str) -> Option<PersistenceState> {
        self.rooms.get(room).map(Room::persistence_state)
    }

    /// Get all room names.
    #[must_use]
    pub fn room_names(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    /// Get store statistics.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            room_count: self.rooms.len(),
            member_count: self.rooms.values().map(Room::member_count).sum(),
            enabled_rooms: self
                .rooms
                .values()
                .filter(|r| r.consensus().is_enabled())
                .count(),
        }
    }

    pub(crate) fn room_mut(&mut self, room: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room)
    }

    /// Get a room for `identity` to enter, creating it if absent.
    ///
    /// Returns the room and whether it was created.
    pub(crate) fn admit(&mut self, room: &str, identity: &str) -> (&mut Room, bool) {
        match self.rooms.entry(room.to_string()) {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => (entry.insert(Self::create(room, identity)), true),
        }
    }

    /// Bring a room into existence with its founding member.
    fn create(room: &str, founder: &str) -> Room {
        info!(room = %room, founder = %founder, "Room created");
        Room::with_founder(room, founder)
    }

    /// Remove a room and everything it holds.
    pub(crate) fn destroy(&mut self, room: &str) -> Option<Room> {
        let removed = self.rooms.remove(room);
        if removed.is_some() {
            info!(room = %room, "Room destroyed");
        }
        removed
    }
}

/// Store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of live rooms.
    pub room_count: usize,
    /// Members summed over all rooms.
    pub member_count: usize,
    /// Rooms with persistence enabled.
    pub enabled_rooms: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_destroy() {
        let mut store = RoomStore::new();
        assert!(store.is_empty());

        let (_, created) = store.admit("lobby", "alice");
        assert!(created);
        assert!(store.contains("lobby"));
        assert_eq!(store.members("lobby").map(BTreeSet::len), Some(1));

        let (_, created) = store.admit("lobby", "bob");
        assert!(!created);

        assert!(store.destroy("lobby").is_some());
        assert!(store.destroy("lobby").is_none());
        assert!(store.room("lobby").is_none());
    }

    #[test]
    fn test_stats() {
        let mut store = RoomStore::new();
        store.join("r1", "alice");
        store.join("r1", "bob");
        store.join("r2", "carol");
        store.cast_vote("r2", "carol");

        let stats = store.stats();
        assert_eq!(stats.room_count, 2);
        assert_eq!(stats.member_count, 3);
        assert_eq!(stats.enabled_rooms, 1);
    }
}
