//! JSON event protocol spoken over the session WebSocket.
//!
//! Wire format (one text frame per event):
//! ```text
//! ┌───────────────────────┬──────────────────────────────────┐
//! │ "event": name         │ "data": payload (shape per name) │
//! └───────────────────────┴──────────────────────────────────┘
//!
//! {"event":"code-change","data":{"roomId":"r1","code":"x=1"}}
//! {"event":"code-update","data":"x=1"}
//! ```
//!
//! Event names match the ones the browser panels already emit and listen
//! for, so an existing client only needs a plain WebSocket in place of its
//! socket wrapper.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::history::ActivityHistory;

/// Opaque room key chosen by the client.
pub type RoomId = String;

/// Identifier assigned to each live connection.
pub type ParticipantId = Uuid;

/// Kind of collaborative artifact a change event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Code,
    Document,
    Whiteboard,
    Chat,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Code,
        ArtifactKind::Document,
        ArtifactKind::Whiteboard,
        ArtifactKind::Chat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Document => "document",
            Self::Whiteboard => "whiteboard",
            Self::Chat => "chat",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "code" => Ok(Self::Code),
            "document" | "doc" => Ok(Self::Document),
            "whiteboard" => Ok(Self::Whiteboard),
            "chat" => Ok(Self::Chat),
            other => Err(ProtocolError::UnknownArtifact(other.to_string())),
        }
    }
}

/// Roster entry describing one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub participant_id: ParticipantId,
    pub name: String,
    /// Seconds since the Unix epoch.
    pub joined_at: u64,
}

/// Payload of `user-joined` / `user-left`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    pub participant_id: ParticipantId,
    pub name: String,
}

/// Payload of `join`: the dashboard announces who is connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    pub username: String,
}

/// Payload of `join-room`.
///
/// Older clients send the bare room id; newer ones send an object that may
/// also carry the display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JoinRequest {
    Room(RoomId),
    Detailed {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl JoinRequest {
    pub fn room_id(&self) -> &str {
        match self {
            Self::Room(id) => id,
            Self::Detailed { room_id, .. } => room_id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Room(_) => None,
            Self::Detailed { name, .. } => name.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhiteboardChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    pub data: String,
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    Join(Identify),
    JoinRoom(JoinRequest),
    LeaveRoom,
    CodeChange(CodeChange),
    DocumentChange(DocumentChange),
    WhiteboardChange(WhiteboardChange),
    ChatMessage(String),
}

/// Artifact change extracted from a client event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeRef<'a> {
    /// Room named by the client, if it named one.
    pub room_id: Option<&'a str>,
    pub kind: ArtifactKind,
    pub payload: &'a str,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::JoinRoom(_) => "join-room",
            Self::LeaveRoom => "leave-room",
            Self::CodeChange(_) => "code-change",
            Self::DocumentChange(_) => "document-change",
            Self::WhiteboardChange(_) => "whiteboard-change",
            Self::ChatMessage(_) => "chat-message",
        }
    }

    /// The artifact change this event carries, if it is a change event.
    pub fn change(&self) -> Option<ChangeRef<'_>> {
        match self {
            Self::CodeChange(c) => Some(ChangeRef {
                room_id: c.room_id.as_deref(),
                kind: ArtifactKind::Code,
                payload: &c.code,
            }),
            Self::DocumentChange(c) => Some(ChangeRef {
                room_id: c.room_id.as_deref(),
                kind: ArtifactKind::Document,
                payload: &c.content,
            }),
            Self::WhiteboardChange(c) => Some(ChangeRef {
                room_id: c.room_id.as_deref(),
                kind: ArtifactKind::Whiteboard,
                payload: &c.data,
            }),
            Self::ChatMessage(text) => Some(ChangeRef {
                room_id: None,
                kind: ArtifactKind::Chat,
                payload: text,
            }),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "code-update")]
    CodeUpdate(String),
    #[serde(rename = "document-update")]
    DocumentUpdate(String),
    #[serde(rename = "whiteboard-update")]
    WhiteboardUpdate(String),
    #[serde(rename = "chat-message")]
    ChatMessage(String),
    #[serde(rename = "user-joined")]
    UserJoined(PresenceNotice),
    #[serde(rename = "user-left")]
    UserLeft(PresenceNotice),
    #[serde(rename = "room-users")]
    RoomUsers(Vec<ParticipantInfo>),
    #[serde(rename = "updateHistory")]
    UpdateHistory(ActivityHistory),
}

impl ServerEvent {
    /// The relay event for an artifact change.
    pub fn artifact_update(kind: ArtifactKind, payload: String) -> Self {
        match kind {
            ArtifactKind::Code => Self::CodeUpdate(payload),
            ArtifactKind::Document => Self::DocumentUpdate(payload),
            ArtifactKind::Whiteboard => Self::WhiteboardUpdate(payload),
            ArtifactKind::Chat => Self::ChatMessage(payload),
        }
    }

    /// Inverse of [`ServerEvent::artifact_update`].
    pub fn as_artifact_update(&self) -> Option<(ArtifactKind, &str)> {
        match self {
            Self::CodeUpdate(p) => Some((ArtifactKind::Code, p)),
            Self::DocumentUpdate(p) => Some((ArtifactKind::Document, p)),
            Self::WhiteboardUpdate(p) => Some((ArtifactKind::Whiteboard, p)),
            Self::ChatMessage(p) => Some((ArtifactKind::Chat, p)),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CodeUpdate(_) => "code-update",
            Self::DocumentUpdate(_) => "document-update",
            Self::WhiteboardUpdate(_) => "whiteboard-update",
            Self::ChatMessage(_) => "chat-message",
            Self::UserJoined(_) => "user-joined",
            Self::UserLeft(_) => "user-left",
            Self::RoomUsers(_) => "room-users",
            Self::UpdateHistory(_) => "updateHistory",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Serialization(String),
    Deserialization(String),
    UnknownArtifact(String),
    /// A change was sent before joining a room.
    NotJoined,
    ConnectionClosed,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
            Self::Deserialization(e) => write!(f, "Deserialization error: {e}"),
            Self::UnknownArtifact(kind) => write!(f, "Unknown artifact type: {kind}"),
            Self::NotJoined => write!(f, "Not joined to a room"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
