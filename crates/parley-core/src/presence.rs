//! Presence: who is in which room.
//!
//! Joining is idempotent. Leaving the last seat removes the room together
//! with its consensus state; leaving otherwise retracts the leaver's vote.

use crate::room::Identity;
use crate::store::RoomStore;
use parley_protocol::PersistenceState;
use tracing::debug;

/// Result of a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Members after the join, sorted.
    pub members: Vec<Identity>,
    /// Whether the room was created by this join.
    pub created: bool,
    /// Persistence snapshot after the join.
    pub state: PersistenceState,
}

/// Result of a leave by a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Others are still present.
    Remaining {
        members: Vec<Identity>,
        state: PersistenceState,
        /// Whether the leaver had an outstanding vote.
        vote_retracted: bool,
    },
    /// The leaver was the last member; the room is gone.
    RoomDeleted,
}

impl LeaveOutcome {
    /// Members left behind. Empty when the room was deleted.
    #[must_use]
    pub fn members(&self) -> &[Identity] {
        match self {
            LeaveOutcome::Remaining { members, .. } => members,
            LeaveOutcome::RoomDeleted => &[],
        }
    }

    /// Persistence snapshot, if the room still exists.
    #[must_use]
    pub fn state(&self) -> Option<PersistenceState> {
        match self {
            LeaveOutcome::Remaining { state, .. } => Some(*state),
            LeaveOutcome::RoomDeleted => None,
        }
    }
}

impl RoomStore {
    /// Add `identity` to `room`, creating the room if needed.
    pub fn join(&mut self, room: &str, identity: &str) -> JoinOutcome {
        let (entry, created) = self.admit(room, identity);
        if !created && entry.add_member(identity) {
            debug!(room = %room, user = %identity, "Presence: member joined");
        }

        JoinOutcome {
            members: entry.user_list(),
            created,
            state: entry.persistence_state(),
        }
    }

    /// Remove `identity` from `room`.
    ///
    /// Returns `None` if the room does not exist or `identity` is not in it.
    pub fn leave(&mut self, room: &str, identity: &str) -> Option<LeaveOutcome> {
        let entry = self.room_mut(room)?;
        let vote_retracted = entry.remove_member(identity)?;
        debug!(room = %room, user = %identity, vote_retracted, "Presence: member left");

        if entry.members().is_empty() {
            self.destroy(room);
            return Some(LeaveOutcome::RoomDeleted);
        }

        Some(LeaveOutcome::Remaining {
            members: entry.user_list(),
            state: entry.persistence_state(),
            vote_retracted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_creates_room() {
        let mut store = RoomStore::new();

        let outcome = store.join("r", "alice");
        assert!(outcome.created);
        assert_eq!(outcome.members, vec!["alice"]);
        assert_eq!(outcome.state, PersistenceState { enabled: false, votes: 0, total: 1 });

        let outcome = store.join("r", "bob");
        assert!(!outcome.created);
        assert_eq!(outcome.members, vec!["alice", "bob"]);
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut store = RoomStore::new();

        let once = store.join("r", "alice");
        let twice = store.join("r", "alice");
        assert_eq!(once.members, twice.members);
        assert!(!twice.created);
    }

    #[test]
    fn test_leave_last_member_deletes_room() {
        let mut store = RoomStore::new();
        store.join("r", "alice");
        store.cast_vote("r", "alice");

        assert_eq!(store.leave("r", "alice"), Some(LeaveOutcome::RoomDeleted));
        assert!(!store.contains("r"));

        // A fresh room starts with persistence off again.
        let outcome = store.join("r", "alice");
        assert!(outcome.created);
        assert!(!outcome.state.enabled);
    }

    #[test]
    fn test_leave_retracts_vote() {
        let mut store = RoomStore::new();
        store.join("r", "alice");
        store.join("r", "bob");
        store.cast_vote("r", "alice");

        let outcome = store.leave("r", "alice").unwrap();
        assert_eq!(outcome.members(), ["bob".to_string()]);
        assert_eq!(
            outcome,
            LeaveOutcome::Remaining {
                members: vec!["bob".to_string()],
                state: PersistenceState { enabled: false, votes: 0, total: 1 },
                vote_retracted: true,
            }
        );
    }

    #[test]
    fn test_leave_preconditions() {
        let mut store = RoomStore::new();
        assert!(store.leave("nowhere", "alice").is_none());

        store.join("r", "alice");
        assert!(store.leave("r", "bob").is_none());
        assert_eq!(store.members("r").map(|m| m.len()), Some(1));
    }
}
