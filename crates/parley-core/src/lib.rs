//! # parley-core
//!
//! Room presence, persistence consensus and event routing for Parley.
//!
//! This crate holds all room state and the decisions made on it:
//!
//! - **Room** - Members of a named room plus its persistence vote
//! - **RoomStore** - The room table; rooms exist exactly while they have members
//! - **Presence** - Join and leave
//! - **Consensus** - Unanimous vote that turns history persistence on
//! - **EventRouter** - Maps an inbound event to state changes and outbound events
//!
//! Nothing here performs I/O. The caller feeds events one at a time and
//! delivers the returned [`Outbound`] events according to their scope.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│ EventRouter │────▶│  RoomStore  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │              │         │
//!        │                   ▼              ▼         ▼
//!        └──────────── Vec<Outbound>    Presence  Consensus
//! ```

pub mod command;
pub mod consensus;
pub mod delivery;
pub mod presence;
pub mod room;
pub mod router;
pub mod store;

pub use command::Command;
pub use consensus::{Consensus, VoteOutcome};
pub use delivery::{DeliveryScope, Outbound};
pub use presence::{JoinOutcome, LeaveOutcome};
pub use room::{Identity, Room, RoomName};
pub use router::EventRouter;
pub use store::{RoomStore, StoreStats};

pub use parley_protocol::{OutboundEvent, PersistenceState};
