//! Core domain models for the synchronization engine.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::value_object::{MessageBody, MessageId, RoomId, Timestamp, UserId};

/// Connection status of the local session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

/// The local identity and its connection status.
///
/// Exactly one per engine; created at engine start, dropped at shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Local user identifier
    pub user_id: UserId,
    /// Name shown to peers
    pub display_name: String,
    /// Current connection status
    pub status: ConnectionStatus,
}

impl Session {
    /// Create a new disconnected session
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            status: ConnectionStatus::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Lifecycle of a message as seen by the local session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryState {
    /// Optimistic local message waiting in the outbound queue
    Pending,
    /// Written to the transport, not yet echoed by the server
    Sent,
    /// Server-confirmed (remote messages are always confirmed)
    Confirmed,
    /// Dropped from the outbound queue by an explicit disconnect
    Failed,
}

/// A chat message in a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server id, or a temporary id while the message is optimistic
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub body: MessageBody,
    pub sent_at: Timestamp,
    /// Peers that acknowledged reading this message
    pub read_by: BTreeSet<UserId>,
    /// Latest read timestamp observed
    pub read_at: Option<Timestamp>,
    pub delivery: DeliveryState,
}

impl Message {
    /// Build an optimistic local message.
    pub fn outgoing(
        id: MessageId,
        room_id: RoomId,
        sender_id: UserId,
        sender_name: impl Into<String>,
        body: MessageBody,
        sent_at: Timestamp,
    ) -> Self {
        Self {
            id,
            room_id,
            sender_id,
            sender_name: sender_name.into(),
            body,
            sent_at,
            read_by: BTreeSet::new(),
            read_at: None,
            delivery: DeliveryState::Pending,
        }
    }

    /// A message is read once any peer acknowledged it.
    pub fn is_read(&self) -> bool {
        !self.read_by.is_empty()
    }
}

/// Read acknowledgement for a single message.
///
/// Ephemeral: consumed to update a [`Message`], never stored on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub reader_id: UserId,
    pub read_at: Timestamp,
}

/// A remote peer currently typing in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingSignal {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub user_name: String,
    pub expires_at: Instant,
}

impl TypingSignal {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Online state of a watched peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub online: bool,
    /// Wall-clock time of the last heartbeat, if any was observed
    pub last_seen_at: Option<Timestamp>,
}

impl PresenceEntry {
    /// A freshly watched peer is offline until a heartbeat says otherwise
    pub fn unknown(user_id: UserId) -> Self {
        Self {
            user_id,
            online: false,
            last_seen_at: None,
        }
    }
}
