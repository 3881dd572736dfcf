//! WebSocket session client for connecting to the session server.
//!
//! Provides:
//! - Connection lifecycle (connect, close)
//! - Room membership (join, leave)
//! - Publishing code, document, whiteboard and chat changes
//! - A stream of [`SessionEvent`]s decoded from server frames
//!
//! A [`SessionClient`] is the whole session context for one user: there is
//! no process-wide connection, so several clients can coexist in one
//! process (the integration tests rely on this).

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::document::RichTextEngine;
use crate::history::ActivityHistory;
use crate::protocol::{
    ArtifactKind, ClientEvent, CodeChange, DocumentChange, Identify, JoinRequest,
    ParticipantInfo, PresenceNotice, ProtocolError, RoomId, ServerEvent, WhiteboardChange,
};

const CHANNEL_CAPACITY: usize = 256;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Events emitted by the session client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection established
    Connected,
    /// Connection lost or closed
    Disconnected,
    /// Another participant changed a shared artifact
    ArtifactUpdated { kind: ArtifactKind, payload: String },
    /// A chat line from another participant
    Chat(String),
    /// A participant entered the room
    ParticipantJoined(PresenceNotice),
    /// A participant left the room
    ParticipantLeft(PresenceNotice),
    /// Current members, sent right after joining
    Roster(Vec<ParticipantInfo>),
    /// The room's activity log
    History(ActivityHistory),
}

impl From<ServerEvent> for SessionEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::CodeUpdate(payload) => Self::ArtifactUpdated {
                kind: ArtifactKind::Code,
                payload,
            },
            ServerEvent::DocumentUpdate(payload) => Self::ArtifactUpdated {
                kind: ArtifactKind::Document,
                payload,
            },
            ServerEvent::WhiteboardUpdate(payload) => Self::ArtifactUpdated {
                kind: ArtifactKind::Whiteboard,
                payload,
            },
            ServerEvent::ChatMessage(text) => Self::Chat(text),
            ServerEvent::UserJoined(notice) => Self::ParticipantJoined(notice),
            ServerEvent::UserLeft(notice) => Self::ParticipantLeft(notice),
            ServerEvent::RoomUsers(roster) => Self::Roster(roster),
            ServerEvent::UpdateHistory(history) => Self::History(history),
        }
    }
}

/// The session client.
///
/// Owns one WebSocket connection. Dropping the client aborts its background
/// tasks; [`SessionClient::close`] shuts the socket down gracefully first.
pub struct SessionClient {
    name: String,
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    room: RwLock<Option<RoomId>>,
    outgoing_tx: mpsc::Sender<Message>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl SessionClient {
    /// Connect to the server and announce `name`.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages and
    /// returns the receiver for decoded server events.
    pub async fn connect(
        url: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), ProtocolError> {
        let server_url = url.into();
        let name = name.into();

        let (ws_stream, _) = tokio_tungstenite::connect_async(server_url.as_str())
            .await
            .map_err(|e| {
                log::warn!("Failed to connect to {server_url}: {e}");
                ProtocolError::ConnectionClosed
            })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(CHANNEL_CAPACITY);
        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if ws_writer.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let _ = event_tx.send(SessionEvent::Connected).await;

        // Reader task: decode server frames into session events
        let reader_state = state.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if event_tx.send(event.into()).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Ignoring undecodable server frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            *reader_state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SessionEvent::Disconnected).await;
        });

        let client = Self {
            name,
            server_url,
            state,
            room: RwLock::new(None),
            outgoing_tx,
            writer: Some(writer),
            reader: Some(reader),
        };
        client
            .send(ClientEvent::Join(Identify {
                username: client.name.clone(),
            }))
            .await?;

        Ok((client, event_rx))
    }

    /// Enter `room_id`, leaving the current room if there is one.
    pub async fn join_room(&self, room_id: impl Into<RoomId>) -> Result<(), ProtocolError> {
        let room_id = room_id.into();
        self.send(ClientEvent::JoinRoom(JoinRequest::Detailed {
            room_id: room_id.clone(),
            name: Some(self.name.clone()),
        }))
        .await?;
        *self.room.write().await = Some(room_id);
        Ok(())
    }

    /// Leave the current room. Does nothing when not in a room.
    pub async fn leave_room(&self) -> Result<(), ProtocolError> {
        if self.room.read().await.is_none() {
            return Ok(());
        }
        self.send(ClientEvent::LeaveRoom).await?;
        *self.room.write().await = None;
        Ok(())
    }

    pub async fn send_code(&self, code: impl Into<String>) -> Result<(), ProtocolError> {
        let room_id = self.current_room().await?;
        self.send(ClientEvent::CodeChange(CodeChange {
            room_id: Some(room_id),
            code: code.into(),
        }))
        .await
    }

    pub async fn send_document(&self, content: impl Into<String>) -> Result<(), ProtocolError> {
        let room_id = self.current_room().await?;
        self.send(ClientEvent::DocumentChange(DocumentChange {
            room_id: Some(room_id),
            content: content.into(),
        }))
        .await
    }

    /// Publish the rendered markup of a rich-text document.
    pub async fn send_document_markup(
        &self,
        document: &impl RichTextEngine,
    ) -> Result<(), ProtocolError> {
        self.send_document(document.render()).await
    }

    pub async fn send_whiteboard(&self, data: impl Into<String>) -> Result<(), ProtocolError> {
        let room_id = self.current_room().await?;
        self.send(ClientEvent::WhiteboardChange(WhiteboardChange {
            room_id: Some(room_id),
            data: data.into(),
        }))
        .await
    }

    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), ProtocolError> {
        self.current_room().await?;
        self.send(ClientEvent::ChatMessage(text.into())).await
    }

    /// Close the socket and wait for the close frame to be written.
    pub async fn close(mut self) {
        if self.outgoing_tx.send(Message::Close(None)).await.is_ok() {
            if let Some(writer) = self.writer.take() {
                let _ = writer.await;
            }
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// The room this client last joined, if it has not left it.
    pub async fn room(&self) -> Option<RoomId> {
        self.room.read().await.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn current_room(&self) -> Result<RoomId, ProtocolError> {
        self.room.read().await.clone().ok_or(ProtocolError::NotJoined)
    }

    async fn send(&self, event: ClientEvent) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let text = event.encode()?;
        self.outgoing_tx
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
