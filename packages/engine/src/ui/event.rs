//! Events delivered to subscribers.

use crate::domain::{ConnectionStatus, Message, MessageId, ReadReceipt, RoomId, SyncError, UserId};

/// Everything a rendering layer can observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A message entered a room timeline (remote, or optimistic local)
    Message(Message),
    /// An optimistic message was echoed by the server under its final id
    MessageConfirmed {
        local_id: MessageId,
        message: Message,
    },
    /// A queued message was dropped by an explicit disconnect
    MessageFailed(Message),
    /// A peer acknowledged a message; `message` carries the updated read state
    ReadReceipt {
        receipt: ReadReceipt,
        message: Message,
    },
    /// Remote typists of a room, first-observed first
    TypingChanged { room_id: RoomId, names: Vec<String> },
    PresenceChanged { user_id: UserId, online: bool },
    ConnectionStateChanged(ConnectionStatus),
    /// The server kept rejecting the token; `connect` with a fresh one
    AuthExpired,
    Error(SyncError),
}
