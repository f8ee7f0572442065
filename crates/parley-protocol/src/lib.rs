//! # parley-protocol
//!
//! Wire event definitions for the Parley room coordinator.
//!
//! Clients talk to the server with named events wrapped in a small
//! envelope:
//!
//! ```json
//! {"event": "join", "data": {"room": "lobby", "username": "alice"}}
//! ```
//!
//! ## Inbound events
//!
//! - `join` / `leave` - Room membership
//! - `send_message` / `typing` - Chat traffic
//! - `vote_persistence` / `request_destroy` - History persistence consensus
//! - `ping` - Keepalive
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, InboundEvent};
//!
//! let event: InboundEvent = codec::decode_json(r#"{"event":"join","data":{"room":"r","username":"alice"}}"#).unwrap();
//! assert!(matches!(event, InboundEvent::Join(_)));
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode_json, encode, encode_json, ProtocolError};
pub use events::{
    ChatMessage, InboundEvent, MembershipPayload, OutboundEvent, PersistenceState, PingPayload,
    SendMessagePayload, TypingPayload, PROTOCOL_VERSION, SYSTEM_USER,
};
