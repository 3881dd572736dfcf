//! # atrium-session - Real-time session layer for shared workspaces
//!
//! Participants join named rooms over WebSocket and exchange whole-artifact
//! changes (code, document, whiteboard, chat). The server relays every
//! change to the other members of the room and remembers the latest value
//! of each artifact so late joiners start from the current state.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     WebSocket      ┌───────────────┐
//! │ SessionClient │ ◄─────────────────► │ SessionServer │
//! │ (per user)    │     JSON events     │ (central)     │
//! └───────────────┘                     └───────┬───────┘
//!                                               │
//!                        ┌──────────────────────┼──────────────────────┐
//!                        ▼                      ▼                      ▼
//!                ┌───────────────┐     ┌─────────────────┐    ┌────────────────┐
//!                │PresenceTracker│ ──► │ChangeBroadcaster│ ─► │SessionRegistry │
//!                │(join / leave) │     │(fan-out, LWW)   │    │(rooms, history)│
//!                └───────────────┘     └─────────────────┘    └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - JSON event frames exchanged with clients
//! - [`registry`] - Rooms, membership and last-write-wins snapshots
//! - [`broadcast`] - Fan-out of changes to everyone except the originator
//! - [`presence`] - Connection lifecycle with joined/left notices
//! - [`history`] - Bounded per-room activity log
//! - [`document`] - Rich-text editing capability for the document artifact
//! - [`server`] - WebSocket session server
//! - [`client`] - WebSocket session client
//!
//! Concurrent edits to the same artifact are not merged: the last change
//! to reach the server wins.

pub mod protocol;
pub mod history;
pub mod registry;
pub mod broadcast;
pub mod presence;
pub mod document;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{
    ArtifactKind, ClientEvent, ParticipantId, ParticipantInfo, PresenceNotice, ProtocolError,
    RoomId, ServerEvent,
};
pub use history::ActivityHistory;
pub use registry::{Participant, RoomHandle, RoomPolicy, SessionRegistry};
pub use broadcast::{BroadcastStats, ChangeBroadcaster, ChangeEvent, Delivery};
pub use presence::{ConnectionPhase, PresenceTracker};
pub use document::{BlockKind, DocumentError, MarkupDocument, RichTextEngine, StyleKind, TextRange};
pub use server::{ServerStats, SessionConfig, SessionServer};
pub use client::{ConnectionState, SessionClient, SessionEvent};
