//! WebSocket session server with room-based change relay.
//!
//! Architecture:
//! ```text
//! Client A ──┐                        ┌── SessionRegistry (rooms, snapshots)
//!             ├── Connection task ────┼── ChangeBroadcaster (fan-out)
//! Client B ──┘    (one per socket)    └── PresenceTracker (join / leave)
//!                      │
//!                      ▼  per-participant mpsc queue
//!                 outgoing frames
//! ```
//!
//! Each connection task owns its socket and drains its own outbound queue,
//! so a broadcast never waits on a peer's network I/O. Nothing is persisted:
//! rooms live only as long as the process.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{ChangeBroadcaster, ChangeEvent};
use crate::presence::{ConnectionPhase, PresenceTracker};
use crate::protocol::{ChangeRef, ClientEvent, ParticipantId, RoomId};
use crate::registry::{Frame, Outbound, Participant, RoomPolicy, SessionRegistry, DEFAULT_HISTORY_LIMIT};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Session server configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames buffered per participant before new ones are dropped
    pub outbound_capacity: usize,
    /// What to do with a room once it is empty
    pub room_policy: RoomPolicy,
    /// Entries kept per activity history list
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5001".to_string(),
            outbound_capacity: 256,
            room_policy: RoomPolicy::Evict,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub rejected_messages: u64,
    pub active_rooms: usize,
}

/// State shared by every connection task.
struct Shared {
    config: SessionConfig,
    registry: Arc<SessionRegistry>,
    broadcaster: Arc<ChangeBroadcaster>,
    presence: PresenceTracker,
    stats: RwLock<ServerStats>,
}

/// The session server.
pub struct SessionServer {
    shared: Arc<Shared>,
}

impl SessionServer {
    /// Create a server. An `outbound_capacity` of 0 is raised to 1.
    pub fn new(mut config: SessionConfig) -> Self {
        if config.outbound_capacity == 0 {
            log::warn!("Outbound capacity 0 is not usable, using 1");
            config.outbound_capacity = 1;
        }
        let registry = Arc::new(SessionRegistry::new(config.room_policy, config.history_limit));
        let broadcaster = Arc::new(ChangeBroadcaster::new(registry.clone()));
        let presence = PresenceTracker::new(broadcaster.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                registry,
                broadcaster,
                presence,
                stats: RwLock::new(ServerStats::default()),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SessionConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        log::info!("Session server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, shared).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        shared: Arc<Shared>,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = shared.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let (outbound, outbound_rx) = mpsc::channel(shared.config.outbound_capacity);
        let mut connection = Connection::new(Uuid::new_v4(), outbound);
        let result = connection.drive(ws_stream, outbound_rx, addr, &shared).await;

        // Runs whether the socket closed cleanly or failed.
        shared.presence.on_disconnect(&connection.id).await;
        connection.phase.transition(ConnectionPhase::Disconnected);
        {
            let mut s = shared.stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.active_rooms = shared.registry.room_count().await;
        }
        log::info!("Connection closed from {addr}");
        result
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.shared.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.shared.config.bind_addr
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.shared.registry
    }

    pub fn broadcaster(&self) -> &Arc<ChangeBroadcaster> {
        &self.shared.broadcaster
    }
}

/// Per-socket state.
struct Connection {
    id: ParticipantId,
    name: String,
    phase: ConnectionPhase,
    room: Option<RoomId>,
    outbound: Outbound,
}

impl Connection {
    fn new(id: ParticipantId, outbound: Outbound) -> Self {
        let short = id.simple().to_string();
        Self {
            id,
            name: format!("Guest-{}", &short[..6]),
            phase: ConnectionPhase::Connecting,
            room: None,
            outbound,
        }
    }

    async fn drive(
        &mut self,
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        mut outbound_rx: mpsc::Receiver<Frame>,
        addr: SocketAddr,
        shared: &Shared,
    ) -> Result<(), BoxError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            {
                                let mut s = shared.stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += text.len() as u64;
                            }
                            match ClientEvent::decode(text.as_str()) {
                                Ok(event) => self.handle_event(event, shared).await,
                                Err(e) => {
                                    log::warn!("Failed to decode message from {addr}: {e}");
                                    shared.stats.write().await.rejected_messages += 1;
                                }
                            }
                        }

                        Some(Ok(Message::Binary(data))) => {
                            log::debug!("Ignoring {}-byte binary frame from {addr}", data.len());
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Ok(Message::Close(_))) | None => break,

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                frame = outbound_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            ws_sender.send(Message::Text(frame.as_ref().into())).await?;
                        }
                        None => break,
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_event(&mut self, event: ClientEvent, shared: &Shared) {
        match &event {
            ClientEvent::Join(identify) => {
                let name = identify.username.trim();
                if !name.is_empty() {
                    self.name = name.to_string();
                    if self.room.is_some() {
                        shared.registry.rename(&self.id, &self.name).await;
                    }
                }
                log::debug!("Connection {} identified as {}", self.id, self.name);
            }

            ClientEvent::JoinRoom(request) => {
                if let Some(name) = request.name().map(str::trim).filter(|n| !n.is_empty()) {
                    self.name = name.to_string();
                }
                let participant = Participant::new(self.id, self.name.clone(), self.outbound.clone());
                shared.presence.on_connect(participant, request.room_id()).await;
                self.room = Some(request.room_id().to_string());
                self.phase.transition(ConnectionPhase::Joined);
                shared.stats.write().await.active_rooms = shared.registry.room_count().await;
            }

            ClientEvent::LeaveRoom => {
                shared.presence.leave_room(&self.id).await;
                self.room = None;
                self.phase.transition(ConnectionPhase::Connecting);
                shared.stats.write().await.active_rooms = shared.registry.room_count().await;
            }

            _ => {
                if let Some(change) = event.change() {
                    self.relay_change(change, shared).await;
                }
            }
        }
    }

    async fn relay_change(&mut self, change: ChangeRef<'_>, shared: &Shared) {
        let Some(room_id) = self.room.clone() else {
            log::debug!("{} sent a {} change before joining a room", self.id, change.kind);
            return;
        };
        if let Some(target) = change.room_id {
            if target != room_id {
                log::warn!(
                    "{} sent a change for room {target} while in room {room_id}, ignored",
                    self.id
                );
                return;
            }
        }

        let event = ChangeEvent::new(room_id.clone(), self.id, change.kind, change.payload);
        if let Err(e) = shared.broadcaster.publish(&event).await {
            log::error!("Failed to relay {} change in room {room_id}: {e}", change.kind);
            return;
        }
        if let Err(e) = shared.broadcaster.broadcast_history(&room_id).await {
            log::error!("Failed to send history for room {room_id}: {e}");
        }
        self.phase.transition(ConnectionPhase::Active);
    }
}
