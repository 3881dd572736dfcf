//! Change broadcaster: relays a change to every other participant in a room.
//!
//! No merge and no versioning: the last publish for an artifact type wins
//! and becomes the room's cached snapshot. Each frame is encoded once and
//! shared by all recipients; delivery is a non-blocking `try_send` into each
//! participant's queue, so a slow or dead peer never stalls the publisher.
//! Delivery is at-most-once. Failed recipients are skipped, never retried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::protocol::{ArtifactKind, ParticipantId, ProtocolError, RoomId, ServerEvent};
use crate::registry::{FanOut, Frame, RoomHandle, SessionRegistry};

/// A change to one artifact, published by one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ArtifactKind,
    /// New content, relayed verbatim.
    pub payload: String,
    pub origin: ParticipantId,
    pub room: RoomId,
}

impl ChangeEvent {
    pub fn new(
        room: impl Into<RoomId>,
        origin: ParticipantId,
        kind: ArtifactKind,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            payload: payload.into(),
            origin,
            room: room.into(),
        }
    }
}

/// Outcome of one relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    /// Recipients that did not get the frame (full or closed queue).
    pub dropped: usize,
}

impl From<FanOut> for Delivery {
    fn from(outcome: FanOut) -> Self {
        Self {
            delivered: outcome.delivered,
            dropped: outcome.dropped + outcome.closed,
        }
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub events_published: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
}

/// Lock-free counters, read through [`ChangeBroadcaster::stats`].
#[derive(Default)]
struct AtomicBroadcastStats {
    events_published: AtomicU64,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn record(&self, delivery: Delivery) {
        self.frames_delivered
            .fetch_add(delivery.delivered as u64, Ordering::Relaxed);
        self.frames_dropped
            .fetch_add(delivery.dropped as u64, Ordering::Relaxed);
    }
}

pub struct ChangeBroadcaster {
    registry: Arc<SessionRegistry>,
    stats: AtomicBroadcastStats,
}

impl ChangeBroadcaster {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            stats: AtomicBroadcastStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Relay `event` to everyone in its room except the originator and
    /// cache the payload as the room's snapshot for that artifact type.
    ///
    /// Publishing to a room that does not exist delivers nothing.
    pub async fn publish(&self, event: &ChangeEvent) -> Result<Delivery, ProtocolError> {
        let Some(room) = self.registry.room(&event.room).await else {
            log::debug!("Publish to unknown room {} ignored", event.room);
            return Ok(Delivery::default());
        };

        let frame = encode(&ServerEvent::artifact_update(event.kind, event.payload.clone()))?;

        let delivery = {
            let mut state = room.lock().await;
            state.snapshots.insert(event.kind, event.payload.clone());

            let author = state
                .find(&event.origin)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "Someone".to_string());
            let limit = state.history_limit;
            state.history.record_change(event.kind, &author, &event.payload, limit);

            Delivery::from(state.fan_out(room.id(), &frame, Some(event.origin)))
        };

        self.stats.events_published.fetch_add(1, Ordering::Relaxed);
        self.stats.record(delivery);
        log::trace!(
            "{} change in room {} relayed to {} peers ({} dropped)",
            event.kind,
            event.room,
            delivery.delivered,
            delivery.dropped
        );
        Ok(delivery)
    }

    /// Send `event` to everyone in `room_id` except `except`.
    pub async fn relay(
        &self,
        room_id: &str,
        event: &ServerEvent,
        except: Option<ParticipantId>,
    ) -> Result<Delivery, ProtocolError> {
        match self.registry.room(room_id).await {
            Some(room) => self.relay_in(&room, event, except).await,
            None => Ok(Delivery::default()),
        }
    }

    /// Send the room's activity history to every member, originator included.
    pub async fn broadcast_history(&self, room_id: &str) -> Result<Delivery, ProtocolError> {
        let Some(room) = self.registry.room(room_id).await else {
            return Ok(Delivery::default());
        };
        let mut state = room.lock().await;
        let frame = encode(&ServerEvent::UpdateHistory(state.history.clone()))?;
        let delivery = Delivery::from(state.fan_out(room.id(), &frame, None));
        drop(state);
        self.stats.record(delivery);
        Ok(delivery)
    }

    pub(crate) async fn relay_in(
        &self,
        room: &RoomHandle,
        event: &ServerEvent,
        except: Option<ParticipantId>,
    ) -> Result<Delivery, ProtocolError> {
        let frame = encode(event)?;
        let delivery = Delivery::from(room.lock().await.fan_out(room.id(), &frame, except));
        self.stats.record(delivery);
        Ok(delivery)
    }

    /// Lock-free snapshot of the counters.
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            events_published: self.stats.events_published.load(Ordering::Relaxed),
            frames_delivered: self.stats.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn encode(event: &ServerEvent) -> Result<Frame, ProtocolError> {
    Ok(Frame::from(event.encode()?))
}
