//! Presence tracking: who is in which room, announced to the room.
//!
//! ## Lifecycle per connection
//!
//! ```text
//! Connecting ──join-room──► Joined ──change──► Active ◄─┐
//!     ▲                       │  ▲               │  └────┘
//!     └──────leave-room───────┘  └──join-room────┘
//!
//! any state ──transport close──► Disconnected (terminal)
//! ```
//!
//! Disconnects are detected from the transport only; there is no
//! application-level liveness timeout.

use std::sync::Arc;

use crate::broadcast::{encode, ChangeBroadcaster};
use crate::protocol::{ArtifactKind, ParticipantId, PresenceNotice, ServerEvent};
use crate::registry::{Participant, RoomHandle, RoomState, SessionRegistry};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// Transport open, not in a room.
    #[default]
    Connecting,
    /// In a room, no change published yet.
    Joined,
    /// In a room and has published at least one change.
    Active,
    Disconnected,
}

impl ConnectionPhase {
    pub fn can_transition(self, next: ConnectionPhase) -> bool {
        use ConnectionPhase::*;
        match (self, next) {
            (Disconnected, _) => false,
            (_, Disconnected) => true,
            (Connecting, Joined) => true,
            (Joined | Active, Joined | Active | Connecting) => true,
            _ => false,
        }
    }

    /// Move to `next` if allowed. Returns whether the phase changed.
    pub fn transition(&mut self, next: ConnectionPhase) -> bool {
        if self.can_transition(next) {
            *self = next;
            true
        } else {
            false
        }
    }

    pub fn in_room(self) -> bool {
        matches!(self, Self::Joined | Self::Active)
    }
}

/// Adds and removes participants and tells the rest of the room.
pub struct PresenceTracker {
    broadcaster: Arc<ChangeBroadcaster>,
}

impl PresenceTracker {
    pub fn new(broadcaster: Arc<ChangeBroadcaster>) -> Self {
        Self { broadcaster }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.broadcaster.registry()
    }

    /// Put `participant` into `room_id` and announce it.
    ///
    /// A participant in a different room leaves it first (with a `user-left`
    /// there). The joiner receives the roster, cached snapshots and history;
    /// everyone else receives `user-joined`.
    pub async fn on_connect(&self, participant: Participant, room_id: &str) -> RoomHandle {
        let participant_id = participant.id;
        let notice = participant.notice();

        let rejoining = match self.registry().room_of(&participant_id).await {
            Some(current) if current == room_id => true,
            Some(_) => {
                self.leave_room(&participant_id).await;
                false
            }
            None => false,
        };

        let room = self
            .registry()
            .join_with(room_id, participant, |state| welcome(state, &participant_id))
            .await;

        if !rejoining {
            if let Err(e) = self
                .broadcaster
                .relay_in(&room, &ServerEvent::UserJoined(notice.clone()), Some(participant_id))
                .await
            {
                log::error!("Failed to announce {participant_id} in room {room_id}: {e}");
            }
        }

        log::info!("Participant {} ({participant_id}) joined room {room_id}", notice.name);
        room
    }

    /// Remove a participant from its room and announce `user-left`.
    ///
    /// Returns `None` when the participant was not in a room.
    pub async fn leave_room(&self, participant_id: &ParticipantId) -> Option<PresenceNotice> {
        let departure = self.registry().leave(participant_id).await?;
        if !departure.room_evicted {
            let left = ServerEvent::UserLeft(departure.notice.clone());
            if let Err(e) = self.broadcaster.relay_in(&departure.room, &left, None).await {
                log::error!("Failed to announce departure of {participant_id}: {e}");
            }
        }
        log::info!(
            "Participant {} ({participant_id}) left room {}",
            departure.notice.name,
            departure.room.id()
        );
        Some(departure.notice)
    }

    /// Transport closed. Safe to call more than once.
    pub async fn on_disconnect(&self, participant_id: &ParticipantId) -> Option<PresenceNotice> {
        self.leave_room(participant_id).await
    }
}

/// Queue the roster, cached snapshots and history for a joiner.
///
/// Runs while the joiner is being added, under the room lock, so these are
/// always its first frames from the room.
fn welcome(state: &RoomState, participant_id: &ParticipantId) {
    let mut events = vec![ServerEvent::RoomUsers(
        state.participants.iter().map(Participant::info).collect(),
    )];
    // Chat is replayed through the history instead.
    for kind in [ArtifactKind::Code, ArtifactKind::Document, ArtifactKind::Whiteboard] {
        if let Some(payload) = state.snapshots.get(&kind) {
            events.push(ServerEvent::artifact_update(kind, payload.clone()));
        }
    }
    events.push(ServerEvent::UpdateHistory(state.history.clone()));

    for event in &events {
        let frame = match encode(event) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Failed to encode {}: {e}", event.name());
                continue;
            }
        };
        if let Err(e) = state.send_to(participant_id, &frame) {
            log::warn!("Welcome {} to {participant_id} not delivered: {e:?}", event.name());
            break;
        }
    }
}
