//! Session registry: room id → participants + last-known artifact snapshots.
//!
//! ```text
//! SessionRegistry
//!   ├── rooms:      RoomId → RoomHandle ── Mutex<RoomState>
//!   │                                        ├── participants (join order)
//!   │                                        ├── snapshots: ArtifactKind → payload
//!   │                                        └── history
//!   └── membership: ParticipantId → RoomId   (at most one room each)
//! ```
//!
//! Lock order is always `rooms` → `membership` → room state. Publishing
//! takes only the room state lock, which keeps delivery FIFO per room on a
//! multi-threaded runtime.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, MutexGuard, RwLock};

use crate::history::ActivityHistory;
use crate::protocol::{ArtifactKind, ParticipantId, ParticipantInfo, PresenceNotice, RoomId};

/// Default number of entries kept per history list.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// An encoded server event, shared between all recipients of one publish.
pub type Frame = Arc<str>;

/// Delivery queue feeding one participant's connection.
pub type Outbound = mpsc::Sender<Frame>;

/// What happens to a room once its last participant leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomPolicy {
    /// Drop the room and its snapshots.
    #[default]
    Evict,
    /// Keep the room (and its snapshots) indefinitely.
    Retain,
}

impl fmt::Display for RoomPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evict => f.write_str("evict"),
            Self::Retain => f.write_str("retain"),
        }
    }
}

impl FromStr for RoomPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "evict" => Ok(Self::Evict),
            "retain" => Ok(Self::Retain),
            other => Err(format!("unknown room policy '{other}' (expected evict or retain)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryError {
    /// The participant's connection is gone.
    Closed,
    /// The participant is not draining its queue fast enough.
    Full,
}

/// A live connection registered in a room.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    /// Seconds since the Unix epoch.
    pub joined_at: u64,
    outbound: Outbound,
}

impl Participant {
    pub fn new(id: ParticipantId, name: impl Into<String>, outbound: Outbound) -> Self {
        Self {
            id,
            name: name.into(),
            joined_at: now_secs(),
            outbound,
        }
    }

    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            participant_id: self.id,
            name: self.name.clone(),
            joined_at: self.joined_at,
        }
    }

    pub fn notice(&self) -> PresenceNotice {
        PresenceNotice {
            participant_id: self.id,
            name: self.name.clone(),
        }
    }

    pub(crate) fn deliver(&self, frame: &Frame) -> Result<(), DeliveryError> {
        self.outbound.try_send(frame.clone()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Result of fanning one frame out to a room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FanOut {
    pub delivered: usize,
    /// Recipients whose queue was full; they stay in the room.
    pub dropped: usize,
    /// Recipients whose connection was closed; they were removed.
    pub closed: usize,
}

/// Mutable state of one room. Only reachable through the room lock.
pub(crate) struct RoomState {
    pub participants: Vec<Participant>,
    pub snapshots: HashMap<ArtifactKind, String>,
    pub history: ActivityHistory,
    pub history_limit: usize,
}

impl RoomState {
    fn new(history_limit: usize) -> Self {
        Self {
            participants: Vec::new(),
            snapshots: HashMap::new(),
            history: ActivityHistory::new(),
            history_limit,
        }
    }

    pub fn find(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        let index = self.participants.iter().position(|p| &p.id == id)?;
        Some(self.participants.remove(index))
    }

    /// Deliver `frame` to every participant except `except`.
    ///
    /// Closed recipients are removed; full recipients miss this frame only.
    pub fn fan_out(&mut self, room_id: &str, frame: &Frame, except: Option<ParticipantId>) -> FanOut {
        let mut outcome = FanOut::default();
        self.participants.retain(|p| {
            if Some(p.id) == except {
                return true;
            }
            match p.deliver(frame) {
                Ok(()) => {
                    outcome.delivered += 1;
                    true
                }
                Err(DeliveryError::Full) => {
                    log::warn!("Participant {} lagging in room {room_id}, frame dropped", p.id);
                    outcome.dropped += 1;
                    true
                }
                Err(DeliveryError::Closed) => {
                    log::warn!("Participant {} unreachable, removed from room {room_id}", p.id);
                    outcome.closed += 1;
                    false
                }
            }
        });
        outcome
    }

    /// Deliver `frame` to a single participant.
    pub fn send_to(&self, id: &ParticipantId, frame: &Frame) -> Result<(), DeliveryError> {
        match self.find(id) {
            Some(p) => p.deliver(frame),
            None => Err(DeliveryError::Closed),
        }
    }
}

struct Room {
    id: RoomId,
    state: Mutex<RoomState>,
}

/// Shared handle to a room.
#[derive(Clone)]
pub struct RoomHandle {
    room: Arc<Room>,
}

impl RoomHandle {
    fn new(id: &str, history_limit: usize) -> Self {
        Self {
            room: Arc::new(Room {
                id: id.to_string(),
                state: Mutex::new(RoomState::new(history_limit)),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.room.id
    }

    /// Roster in join order.
    pub async fn participants(&self) -> Vec<ParticipantInfo> {
        self.lock().await.participants.iter().map(Participant::info).collect()
    }

    pub async fn participant_count(&self) -> usize {
        self.lock().await.participants.len()
    }

    pub async fn contains(&self, id: &ParticipantId) -> bool {
        self.lock().await.find(id).is_some()
    }

    /// Last cached payload for `kind`.
    pub async fn snapshot(&self, kind: ArtifactKind) -> Option<String> {
        self.lock().await.snapshots.get(&kind).cloned()
    }

    pub async fn history(&self) -> ActivityHistory {
        self.lock().await.history.clone()
    }

    /// Whether both handles point at the same room instance.
    pub fn same_room(&self, other: &RoomHandle) -> bool {
        Arc::ptr_eq(&self.room, &other.room)
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.room.state.lock().await
    }
}

impl fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomHandle").field("id", &self.room.id).finish()
    }
}

/// A participant leaving its room.
#[derive(Debug, Clone)]
pub struct Departure {
    pub room: RoomHandle,
    pub notice: PresenceNotice,
    /// The room was empty afterwards and has been evicted.
    pub room_evicted: bool,
}

#[derive(Debug, Clone)]
struct Membership {
    room_id: RoomId,
    notice: PresenceNotice,
}

/// In-memory registry of rooms and their participants. Nothing is persisted.
pub struct SessionRegistry {
    rooms: RwLock<HashMap<RoomId, RoomHandle>>,
    membership: RwLock<HashMap<ParticipantId, Membership>>,
    policy: RoomPolicy,
    history_limit: usize,
}

impl SessionRegistry {
    pub fn new(policy: RoomPolicy, history_limit: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            membership: RwLock::new(HashMap::new()),
            policy,
            history_limit,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RoomPolicy::default(), DEFAULT_HISTORY_LIMIT)
    }

    pub fn policy(&self) -> RoomPolicy {
        self.policy
    }

    /// Add `participant` to `room_id`, creating the room if absent.
    ///
    /// Never fails: the room id is an opaque key. A participant already in
    /// another room is moved out of it first; joining the same room again
    /// replaces the previous entry.
    pub async fn join(&self, room_id: &str, participant: Participant) -> RoomHandle {
        self.join_with(room_id, participant, |_| {}).await
    }

    /// Like [`join`](Self::join), then runs `on_join` on the room state
    /// before the room lock is released. Nothing else can reach the room
    /// between the participant being added and `on_join` returning.
    pub(crate) async fn join_with<F>(
        &self,
        room_id: &str,
        participant: Participant,
        on_join: F,
    ) -> RoomHandle
    where
        F: FnOnce(&RoomState),
    {
        let mut rooms = self.rooms.write().await;
        let mut membership = self.membership.write().await;

        if let Some(previous) = membership.remove(&participant.id) {
            let moving = previous.room_id != room_id;
            if moving {
                log::debug!(
                    "Participant {} moved from room {} to {room_id}",
                    participant.id,
                    previous.room_id
                );
            }
            let evict = moving && self.policy == RoomPolicy::Evict;
            Self::detach(&mut rooms, &previous.room_id, &participant.id, evict).await;
        }

        let handle = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                log::info!("Room {room_id} created");
                RoomHandle::new(room_id, self.history_limit)
            })
            .clone();

        membership.insert(
            participant.id,
            Membership {
                room_id: room_id.to_string(),
                notice: participant.notice(),
            },
        );
        let mut state = handle.lock().await;
        state.participants.push(participant);
        on_join(&state);
        drop(state);
        handle
    }

    /// Change the display name of a participant already in a room.
    ///
    /// Returns `false` when the participant is not in any room.
    pub async fn rename(&self, participant_id: &ParticipantId, name: &str) -> bool {
        let rooms = self.rooms.read().await;
        let mut membership = self.membership.write().await;
        let Some(entry) = membership.get_mut(participant_id) else {
            return false;
        };
        entry.notice.name = name.to_string();

        if let Some(room) = rooms.get(&entry.room_id) {
            let mut state = room.lock().await;
            if let Some(p) = state.participants.iter_mut().find(|p| &p.id == participant_id) {
                p.name = name.to_string();
            }
        }
        true
    }

    /// Remove a participant from its room.
    ///
    /// Returns `None` if the participant is not in any room, so calling it
    /// twice is harmless.
    pub async fn leave(&self, participant_id: &ParticipantId) -> Option<Departure> {
        let mut rooms = self.rooms.write().await;
        let membership = self.membership.write().await.remove(participant_id)?;
        let evict = self.policy == RoomPolicy::Evict;
        let (room, room_evicted) =
            Self::detach(&mut rooms, &membership.room_id, participant_id, evict).await?;
        Some(Departure {
            room,
            notice: membership.notice,
            room_evicted,
        })
    }

    /// Last cached payload for `kind` in `room_id`.
    pub async fn snapshot(&self, room_id: &str, kind: ArtifactKind) -> Option<String> {
        let room = self.room(room_id).await?;
        room.snapshot(kind).await
    }

    pub async fn room(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// The room a participant currently belongs to.
    pub async fn room_of(&self, participant_id: &ParticipantId) -> Option<RoomId> {
        self.membership
            .read()
            .await
            .get(participant_id)
            .map(|m| m.room_id.clone())
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_rooms(&self) -> Vec<RoomId> {
        self.rooms.read().await.keys().cloned().collect()
    }

    /// Number of participants across all rooms.
    pub async fn participant_count(&self) -> usize {
        self.membership.read().await.len()
    }

    async fn detach(
        rooms: &mut HashMap<RoomId, RoomHandle>,
        room_id: &str,
        participant_id: &ParticipantId,
        evict_if_empty: bool,
    ) -> Option<(RoomHandle, bool)> {
        let handle = rooms.get(room_id)?.clone();
        let now_empty = {
            let mut state = handle.lock().await;
            state.remove(participant_id);
            state.participants.is_empty()
        };
        let evicted = evict_if_empty && now_empty;
        if evicted {
            rooms.remove(room_id);
            log::info!("Room {room_id} removed (empty)");
        }
        Some((handle, evicted))
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn participant(name: &str) -> (Participant, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(16);
        (Participant::new(Uuid::new_v4(), name, tx), rx)
    }

    #[tokio::test]
    async fn test_join_creates_room() {
        let registry = SessionRegistry::with_defaults();
        let (alice, _rx) = participant("Alice");
        let alice_id = alice.id;

        let room = registry.join("r1", alice).await;
        assert_eq!(room.id(), "r1");
        assert!(room.contains(&alice_id).await);
        assert_eq!(registry.room_count().await, 1);
        assert_eq!(registry.room_of(&alice_id).await.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_join_same_room_shares_handle() {
        let registry = SessionRegistry::with_defaults();
        let (alice, _rx1) = participant("Alice");
        let (bob, _rx2) = participant("Bob");

        let room1 = registry.join("r1", alice).await;
        let room2 = registry.join("r1", bob).await;
        assert!(room1.same_room(&room2));
        assert_eq!(room1.participant_count().await, 2);
    }

    #[tokio::test]
    async fn test_malformed_room_id_is_opaque_key() {
        let registry = SessionRegistry::with_defaults();
        let (alice, _rx) = participant("Alice");
        let room = registry.join("", alice).await;
        assert_eq!(room.id(), "");
        assert!(registry.room("").await.is_some());
    }

    #[tokio::test]
    async fn test_participant_in_one_room_at_a_time() {
        let registry = SessionRegistry::with_defaults();
        let (alice, _rx) = participant("Alice");
        let alice_id = alice.id;

        let r1 = registry.join("r1", alice.clone()).await;
        let r2 = registry.join("r2", alice).await;

        assert!(!r1.contains(&alice_id).await);
        assert!(r2.contains(&alice_id).await);
        assert_eq!(registry.room_of(&alice_id).await.as_deref(), Some("r2"));
        assert_eq!(registry.participant_count().await, 1);
        // r1 was left empty and the default policy evicts it.
        assert!(registry.room("r1").await.is_none());
    }

    #[tokio::test]
    async fn test_rejoin_same_room_keeps_snapshots() {
        let registry = SessionRegistry::with_defaults();
        let (alice, _rx) = participant("Alice");
        let alice_id = alice.id;

        let room = registry.join("r1", alice.clone()).await;
        room.lock().await.snapshots.insert(ArtifactKind::Code, "x=1".into());

        let again = registry.join("r1", alice).await;
        assert!(room.same_room(&again));
        assert_eq!(again.participant_count().await, 1);
        assert!(again.contains(&alice_id).await);
        assert_eq!(registry.snapshot("r1", ArtifactKind::Code).await.as_deref(), Some("x=1"));
    }

    #[tokio::test]
    async fn test_leave_evicts_empty_room() {
        let registry = SessionRegistry::new(RoomPolicy::Evict, 10);
        let (alice, _rx) = participant("Alice");
        let alice_id = alice.id;
        registry.join("r1", alice).await;

        let departure = registry.leave(&alice_id).await.unwrap();
        assert_eq!(departure.room.id(), "r1");
        assert_eq!(departure.notice.name, "Alice");
        assert!(departure.room_evicted);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_leave_retains_room_under_retain_policy() {
        let registry = SessionRegistry::new(RoomPolicy::Retain, 10);
        let (alice, _rx) = participant("Alice");
        let alice_id = alice.id;
        let room = registry.join("r1", alice).await;
        room.lock().await.snapshots.insert(ArtifactKind::Document, "<p>hi</p>".into());

        let departure = registry.leave(&alice_id).await.unwrap();
        assert!(!departure.room_evicted);
        assert_eq!(registry.room_count().await, 1);
        assert_eq!(
            registry.snapshot("r1", ArtifactKind::Document).await.as_deref(),
            Some("<p>hi</p>")
        );
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let registry = SessionRegistry::with_defaults();
        let (alice, _rx) = participant("Alice");
        let alice_id = alice.id;
        registry.join("r1", alice).await;

        assert!(registry.leave(&alice_id).await.is_some());
        assert!(registry.leave(&alice_id).await.is_none());
        assert!(registry.leave(&Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_leave_keeps_nonempty_room() {
        let registry = SessionRegistry::with_defaults();
        let (alice, _rx1) = participant("Alice");
        let (bob, _rx2) = participant("Bob");
        let alice_id = alice.id;
        registry.join("r1", alice).await;
        registry.join("r1", bob).await;

        let departure = registry.leave(&alice_id).await.unwrap();
        assert!(!departure.room_evicted);
        assert_eq!(departure.room.participant_count().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_absent() {
        let registry = SessionRegistry::with_defaults();
        assert!(registry.snapshot("missing", ArtifactKind::Code).await.is_none());

        let (alice, _rx) = participant("Alice");
        registry.join("r1", alice).await;
        assert!(registry.snapshot("r1", ArtifactKind::Whiteboard).await.is_none());
    }

    #[tokio::test]
    async fn test_roster_in_join_order() {
        let registry = SessionRegistry::with_defaults();
        let (alice, _rx1) = participant("Alice");
        let (bob, _rx2) = participant("Bob");
        registry.join("r1", alice).await;
        let room = registry.join("r1", bob).await;

        let names: Vec<String> = room.participants().await.into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
    }

    #[tokio::test]
    async fn test_fan_out_removes_closed_recipient() {
        let registry = SessionRegistry::with_defaults();
        let (alice, mut alice_rx) = participant("Alice");
        let (bob, bob_rx) = participant("Bob");
        let bob_id = bob.id;
        let room = registry.join("r1", alice).await;
        registry.join("r1", bob).await;
        drop(bob_rx);

        let frame: Frame = Arc::from("hello");
        let outcome = room.lock().await.fan_out("r1", &frame, None);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.closed, 1);
        assert!(!room.contains(&bob_id).await);
        assert_eq!(&*alice_rx.recv().await.unwrap(), "hello");

        // The stale membership entry is still cleaned up by leave().
        let departure = registry.leave(&bob_id).await.unwrap();
        assert_eq!(departure.notice.name, "Bob");
    }

    #[tokio::test]
    async fn test_fan_out_full_queue_drops_frame_only() {
        let registry = SessionRegistry::with_defaults();
        let (tx, _rx) = mpsc::channel(1);
        let slow = Participant::new(Uuid::new_v4(), "Slow", tx);
        let slow_id = slow.id;
        let room = registry.join("r1", slow).await;

        let frame: Frame = Arc::from("a");
        let mut state = room.lock().await;
        assert_eq!(state.fan_out("r1", &frame, None).delivered, 1);
        let second = state.fan_out("r1", &frame, None);
        assert_eq!(second.dropped, 1);
        assert!(state.find(&slow_id).is_some());
    }

    #[tokio::test]
    async fn test_join_with_sees_new_participant() {
        let registry = SessionRegistry::with_defaults();
        let (alice, _rx1) = participant("Alice");
        let (bob, _rx2) = participant("Bob");
        let bob_id = bob.id;
        registry.join("r1", alice).await;

        let mut seen = Vec::new();
        registry
            .join_with("r1", bob, |state| {
                seen = state.participants.iter().map(|p| p.name.clone()).collect();
                assert!(state.find(&bob_id).is_some());
            })
            .await;
        assert_eq!(seen, vec!["Alice", "Bob"]);
    }

    #[tokio::test]
    async fn test_rename_updates_roster_and_departure() {
        let registry = SessionRegistry::with_defaults();
        let (alice, _rx) = participant("Guest-1a2b3c");
        let alice_id = alice.id;
        let room = registry.join("r1", alice).await;

        assert!(registry.rename(&alice_id, "Alice").await);
        assert_eq!(room.participants().await[0].name, "Alice");

        let departure = registry.leave(&alice_id).await.unwrap();
        assert_eq!(departure.notice.name, "Alice");
        assert!(!registry.rename(&alice_id, "Ghost").await);
    }

    #[test]
    fn test_room_policy_parse() {
        assert_eq!("evict".parse::<RoomPolicy>().unwrap(), RoomPolicy::Evict);
        assert_eq!("RETAIN".parse::<RoomPolicy>().unwrap(), RoomPolicy::Retain);
        assert!("forever".parse::<RoomPolicy>().is_err());
        assert_eq!(RoomPolicy::default(), RoomPolicy::Evict);
    }
}
