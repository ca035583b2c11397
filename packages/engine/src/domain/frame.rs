//! Semantic frames exchanged with the messaging endpoint.
//!
//! These are the decoded meanings of wire frames; the JSON shape lives in
//! `infrastructure::dto::frame`.

use super::{Message, MessageBody, MessageId, ReadReceipt, RoomId, Timestamp, UserId};

/// Frames the local session sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Join { room_id: RoomId },
    Leave { room_id: RoomId },
    Message(Message),
    ReadReceipt(ReadReceipt),
    TypingStart {
        room_id: RoomId,
        user_id: UserId,
        user_name: String,
    },
    TypingStop { room_id: RoomId, user_id: UserId },
    PresenceHeartbeat { user_id: UserId },
    PresenceSubscribe { user_ids: Vec<UserId> },
    PresenceUnsubscribe { user_ids: Vec<UserId> },
    Ping,
    Pong,
}

impl OutboundFrame {
    /// Wire name of the frame type, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Message(_) => "message",
            Self::ReadReceipt(_) => "read_receipt",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::PresenceHeartbeat { .. } => "presence_heartbeat",
            Self::PresenceSubscribe { .. } => "presence_subscribe",
            Self::PresenceUnsubscribe { .. } => "presence_unsubscribe",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

/// A message as delivered by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    /// Server-assigned id
    pub id: MessageId,
    /// Temporary id echoed back for messages this session sent
    pub client_id: Option<MessageId>,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub body: MessageBody,
    pub sent_at: Timestamp,
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Message(RemoteMessage),
    ReadReceipt(ReadReceipt),
    TypingStart {
        room_id: RoomId,
        user_id: UserId,
        user_name: String,
    },
    TypingStop { room_id: RoomId, user_id: UserId },
    PresenceHeartbeat {
        user_id: UserId,
        online: bool,
        seen_at: Timestamp,
    },
    /// Server acknowledgement of a join
    Joined { room_id: RoomId },
    /// Server acknowledgement of a leave
    Left { room_id: RoomId },
    Ping,
    Pong,
}
