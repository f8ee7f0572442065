//! Persistence consensus.
//!
//! Each room starts with history persistence off. It turns on once every
//! member currently present has voted for it, and stays on until the room
//! is removed. Unanimity is checked by comparing the vote set with the live
//! member set on every vote, never against a count captured earlier: people
//! join and leave while a vote is running.

use crate::room::Identity;
use crate::store::RoomStore;
use parley_protocol::PersistenceState;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Persistence flag and outstanding votes for one room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Consensus {
    enabled: bool,
    votes: BTreeSet<Identity>,
}

impl Consensus {
    /// Persistence off, no votes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether persistence is on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of outstanding votes. Always zero once enabled.
    #[must_use]
    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    /// Identities with an outstanding vote.
    #[must_use]
    pub fn voters(&self) -> &BTreeSet<Identity> {
        &self.votes
    }

    /// Drop a departing member's vote.
    pub(crate) fn retract(&mut self, identity: &str) -> bool {
        self.votes.remove(identity)
    }

    /// Record a vote from a member and evaluate unanimity.
    ///
    /// The caller guarantees `identity` is in `members`.
    pub(crate) fn record(&mut self, identity: &str, members: &BTreeSet<Identity>) -> VoteOutcome {
        let total = members.len();

        if self.enabled {
            return VoteOutcome::AlreadyEnabled { total };
        }

        self.votes.insert(identity.to_string());

        if self.votes == *members {
            self.enabled = true;
            self.votes.clear();
            return VoteOutcome::JustEnabled { total };
        }

        VoteOutcome::Pending {
            votes: self.votes.len(),
            total,
        }
    }
}

/// Result of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Not everyone has voted yet.
    Pending { votes: usize, total: usize },
    /// This vote completed the consensus.
    JustEnabled { total: usize },
    /// Persistence was already on; nothing changed.
    AlreadyEnabled { total: usize },
}

impl VoteOutcome {
    /// Persistence snapshot after the vote.
    #[must_use]
    pub fn state(&self) -> PersistenceState {
        match *self {
            VoteOutcome::Pending { votes, total } => PersistenceState {
                enabled: false,
                votes,
                total,
            },
            VoteOutcome::JustEnabled { total } | VoteOutcome::AlreadyEnabled { total } => {
                PersistenceState {
                    enabled: true,
                    votes: 0,
                    total,
                }
            }
        }
    }

    /// Whether this vote flipped persistence on.
    #[must_use]
    pub fn just_enabled(&self) -> bool {
        matches!(self, VoteOutcome::JustEnabled { .. })
    }
}

impl RoomStore {
    /// Cast a persistence vote.
    ///
    /// Returns `None` without touching anything if the room does not exist
    /// or `identity` is not one of its members.
    pub fn cast_vote(&mut self, room: &str, identity: &str) -> Option<VoteOutcome> {
        let Some(entry) = self.room_mut(room) else {
            debug!(room = %room, user = %identity, "Vote for unknown room ignored");
            return None;
        };

        if !entry.is_member(identity) {
            debug!(room = %room, user = %identity, "Vote from non-member ignored");
            return None;
        }

        let outcome = entry.vote(identity);
        match outcome {
            VoteOutcome::JustEnabled { total } => {
                info!(room = %room, members = total, "Persistence enabled by unanimous vote");
            }
            VoteOutcome::Pending { votes, total } => {
                debug!(room = %room, user = %identity, votes, total, "Persistence vote recorded");
            }
            VoteOutcome::AlreadyEnabled { .. } => {
                debug!(room = %room, user = %identity, "Vote while persistence already enabled");
            }
        }

        Some(outcome)
    }

    /// Whether a destroy signal requested by `identity` should go out.
    ///
    /// True only while the room exists with persistence enabled. Never
    /// mutates anything: the signal tells clients to drop their history, the
    /// room itself is unaffected.
    #[must_use]
    pub fn request_destroy_signal(&self, room: &str, identity: &str) -> bool {
        let allowed = self
            .room(room)
            .is_some_and(|entry| entry.consensus().is_enabled());

        debug!(room = %room, user = %identity, allowed, "Destroy signal requested");
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(names: &[&str]) -> BTreeSet<Identity> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_unanimity_by_set_equality() {
        let everyone = members(&["a", "b", "c"]);
        let mut consensus = Consensus::new();

        assert_eq!(
            consensus.record("a", &everyone),
            VoteOutcome::Pending { votes: 1, total: 3 }
        );
        assert_eq!(
            consensus.record("b", &everyone),
            VoteOutcome::Pending { votes: 2, total: 3 }
        );
        assert_eq!(consensus.record("c", &everyone), VoteOutcome::JustEnabled { total: 3 });
        assert!(consensus.is_enabled());
        assert_eq!(consensus.vote_count(), 0);
    }

    #[test]
    fn test_repeat_vote_does_not_count_twice() {
        let everyone = members(&["a", "b"]);
        let mut consensus = Consensus::new();

        consensus.record("a", &everyone);
        assert_eq!(
            consensus.record("a", &everyone),
            VoteOutcome::Pending { votes: 1, total: 2 }
        );
    }

    #[test]
    fn test_vote_when_enabled_is_unchanged() {
        let everyone = members(&["a"]);
        let mut consensus = Consensus::new();

        assert!(consensus.record("a", &everyone).just_enabled());
        let again = consensus.record("a", &everyone);
        assert_eq!(again, VoteOutcome::AlreadyEnabled { total: 1 });
        assert!(!again.just_enabled());
        assert_eq!(consensus.vote_count(), 0);
    }

    #[test]
    fn test_outcome_state() {
        assert_eq!(
            VoteOutcome::Pending { votes: 2, total: 4 }.state(),
            PersistenceState { enabled: false, votes: 2, total: 4 }
        );
        assert_eq!(
            VoteOutcome::JustEnabled { total: 4 }.state(),
            PersistenceState { enabled: true, votes: 0, total: 4 }
        );
    }

    #[test]
    fn test_store_vote_requires_membership() {
        let mut store = RoomStore::new();
        assert!(store.cast_vote("r", "alice").is_none());

        store.join("r", "alice");
        store.join("r", "bob");
        assert!(store.cast_vote("r", "mallory").is_none());
        assert_eq!(store.persistence_state("r").map(|s| s.votes), Some(0));
    }

    #[test]
    fn test_late_joiner_must_vote_too() {
        let mut store = RoomStore::new();
        for name in ["a", "b", "c"] {
            store.join("r", name);
        }

        store.cast_vote("r", "a");
        store.cast_vote("r", "b");
        store.join("r", "d");

        assert_eq!(
            store.cast_vote("r", "c"),
            Some(VoteOutcome::Pending { votes: 3, total: 4 })
        );
        assert_eq!(store.cast_vote("r", "d"), Some(VoteOutcome::JustEnabled { total: 4 }));
    }

    #[test]
    fn test_destroy_signal_gated_on_persistence() {
        let mut store = RoomStore::new();
        assert!(!store.request_destroy_signal("r", "alice"));

        store.join("r", "alice");
        assert!(!store.request_destroy_signal("r", "alice"));

        store.cast_vote("r", "alice");
        assert!(store.request_destroy_signal("r", "alice"));
        assert!(store.contains("r"));
    }
}
