//! Rooms.
//!
//! A room is created with its first member and removed with its last one,
//! so a `Room` value never has an empty member set while it sits in the
//! [`RoomStore`](crate::RoomStore).

use crate::consensus::Consensus;
use parley_protocol::PersistenceState;
use std::collections::BTreeSet;

/// A room name.
pub type RoomName = String;

/// A caller-supplied display name. Not verified.
pub type Identity = String;

/// A named room with its members and persistence vote.
#[derive(Debug, Clone)]
pub struct Room {
    name: RoomName,
    members: BTreeSet<Identity>,
    consensus: Consensus,
}

impl Room {
    /// Create a room holding only its founding member.
    pub(crate) fn with_founder(name: impl Into<RoomName>, founder: impl Into<Identity>) -> Self {
        let mut members = BTreeSet::new();
        members.insert(founder.into());
        Self {
            name: name.into(),
            members,
            consensus: Consensus::new(),
        }
    }

    /// Get the room name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current members.
    #[must_use]
    pub fn members(&self) -> &BTreeSet<Identity> {
        &self.members
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check whether an identity is present.
    #[must_use]
    pub fn is_member(&self, identity: &str) -> bool {
        self.members.contains(identity)
    }

    /// Get the persistence vote.
    #[must_use]
    pub fn consensus(&self) -> &Consensus {
        &self.consensus
    }

    /// Members in sorted order, as sent in `user_list`.
    #[must_use]
    pub fn user_list(&self) -> Vec<Identity> {
        self.members.iter().cloned().collect()
    }

    /// Current persistence snapshot.
    #[must_use]
    pub fn persistence_state(&self) -> PersistenceState {
        PersistenceState {
            enabled: self.consensus.is_enabled(),
            votes: self.consensus.vote_count(),
            total: self.members.len(),
        }
    }

    /// Add a member. Returns `true` if it was not already present.
    pub(crate) fn add_member(&mut self, identity: &str) -> bool {
        if self.members.contains(identity) {
            return false;
        }
        self.members.insert(identity.to_string())
    }

    /// Remove a member and retract any vote it cast.
    ///
    /// Returns `None` if the identity was not a member, otherwise whether a
    /// vote was retracted.
    pub(crate) fn remove_member(&mut self, identity: &str) -> Option<bool> {
        if !self.members.remove(identity) {
            return None;
        }
        Some(self.consensus.retract(identity))
    }

    /// Record a vote against the live member set.
    pub(crate) fn vote(&mut self, identity: &str) -> crate::consensus::VoteOutcome {
        self.consensus.record(identity, &self.members)
    }
}
