//! JSON frame DTOs and the codec between wire frames and domain frames.
//!
//! Every frame on the wire is a JSON text message:
//!
//! ```json
//! {"type": "message", "room_id": "lobby", "payload": {...}, "timestamp": 1700000000000}
//! ```

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::domain::{
    FrameError, InboundFrame, MessageBody, MessageId, OutboundFrame, ReadReceipt, RemoteMessage,
    RoomId, Timestamp, UserId,
};

/// Frame type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Join,
    Leave,
    Joined,
    Left,
    Message,
    ReadReceipt,
    TypingStart,
    TypingStop,
    PresenceHeartbeat,
    PresenceSubscribe,
    PresenceUnsubscribe,
    Ping,
    Pong,
}

impl FrameType {
    fn name(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Joined => "joined",
            Self::Left => "left",
            Self::Message => "message",
            Self::ReadReceipt => "read_receipt",
            Self::TypingStart => "typing_start",
            Self::TypingStop => "typing_stop",
            Self::PresenceHeartbeat => "presence_heartbeat",
            Self::PresenceSubscribe => "presence_subscribe",
            Self::PresenceUnsubscribe => "presence_unsubscribe",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

/// Envelope shared by every frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFrame {
    pub r#type: FrameType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    /// Unix timestamp (milliseconds since epoch, UTC) of emission
    #[serde(default)]
    pub timestamp: i64,
}

/// Payload of `message`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Server-assigned id; absent on frames the client sends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Temporary id chosen by the sending client, echoed back by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<i64>,
}

/// Payload of `read_receipt`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceiptPayload {
    pub message_id: String,
    pub reader_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<i64>,
}

/// Payload of `typing_start` / `typing_stop`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingPayload {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

/// Payload of `presence_heartbeat`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user_id: String,
    #[serde(default = "default_online")]
    pub online: bool,
}

fn default_online() -> bool {
    true
}

/// Payload of `presence_subscribe` / `presence_unsubscribe`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceWatchPayload {
    pub user_ids: Vec<String>,
}

/// Decode one inbound text frame.
pub fn decode_frame(text: &str) -> Result<InboundFrame, FrameError> {
    let raw: RawFrame =
        serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
    let frame_type = raw.r#type;
    let timestamp = Timestamp::new(raw.timestamp);

    let frame = match frame_type {
        FrameType::Message => {
            let room_id = required_room(&raw)?;
            let payload: MessagePayload = payload_of(raw.payload)?;
            let id = payload.id.ok_or(FrameError::MissingField {
                frame_type: "message",
                field: "id",
            })?;
            InboundFrame::Message(RemoteMessage {
                id: MessageId::new(id)?,
                client_id: payload.client_id.map(MessageId::new).transpose()?,
                room_id,
                sender_id: UserId::new(payload.sender_id)?,
                sender_name: payload.sender_name,
                body: MessageBody::new(payload.body)?,
                sent_at: payload.sent_at.map_or(timestamp, Timestamp::new),
            })
        }
        FrameType::ReadReceipt => {
            let room_id = required_room(&raw)?;
            let payload: ReadReceiptPayload = payload_of(raw.payload)?;
            InboundFrame::ReadReceipt(ReadReceipt {
                message_id: MessageId::new(payload.message_id)?,
                room_id,
                reader_id: UserId::new(payload.reader_id)?,
                read_at: payload.read_at.map_or(timestamp, Timestamp::new),
            })
        }
        FrameType::TypingStart => {
            let room_id = required_room(&raw)?;
            let payload: TypingPayload = payload_of(raw.payload)?;
            let user_name = payload
                .user_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| payload.user_id.clone());
            InboundFrame::TypingStart {
                room_id,
                user_id: UserId::new(payload.user_id)?,
                user_name,
            }
        }
        FrameType::TypingStop => {
            let room_id = required_room(&raw)?;
            let payload: TypingPayload = payload_of(raw.payload)?;
            InboundFrame::TypingStop {
                room_id,
                user_id: UserId::new(payload.user_id)?,
            }
        }
        FrameType::PresenceHeartbeat => {
            let payload: PresencePayload = payload_of(raw.payload)?;
            InboundFrame::PresenceHeartbeat {
                user_id: UserId::new(payload.user_id)?,
                online: payload.online,
                seen_at: timestamp,
            }
        }
        FrameType::Joined => InboundFrame::Joined {
            room_id: required_room(&raw)?,
        },
        FrameType::Left => InboundFrame::Left {
            room_id: required_room(&raw)?,
        },
        FrameType::Ping => InboundFrame::Ping,
        FrameType::Pong => InboundFrame::Pong,
        FrameType::Join
        | FrameType::Leave
        | FrameType::PresenceSubscribe
        | FrameType::PresenceUnsubscribe => {
            return Err(FrameError::Malformed(format!(
                "'{}' is not a server frame",
                frame_type.name()
            )));
        }
    };

    Ok(frame)
}

/// Encode one outbound frame, stamped with `timestamp`.
pub fn encode_frame(frame: &OutboundFrame, timestamp: Timestamp) -> Result<String, FrameError> {
    let (frame_type, room_id, payload) = match frame {
        OutboundFrame::Join { room_id } => (FrameType::Join, Some(room_id), empty_payload()),
        OutboundFrame::Leave { room_id } => (FrameType::Leave, Some(room_id), empty_payload()),
        OutboundFrame::Message(message) => (
            FrameType::Message,
            Some(&message.room_id),
            payload_value(&MessagePayload {
                id: None,
                client_id: Some(message.id.as_str().to_string()),
                sender_id: message.sender_id.as_str().to_string(),
                sender_name: message.sender_name.clone(),
                body: message.body.as_str().to_string(),
                sent_at: Some(message.sent_at.value()),
            })?,
        ),
        OutboundFrame::ReadReceipt(receipt) => (
            FrameType::ReadReceipt,
            Some(&receipt.room_id),
            payload_value(&ReadReceiptPayload {
                message_id: receipt.message_id.as_str().to_string(),
                reader_id: receipt.reader_id.as_str().to_string(),
                read_at: Some(receipt.read_at.value()),
            })?,
        ),
        OutboundFrame::TypingStart {
            room_id,
            user_id,
            user_name,
        } => (
            FrameType::TypingStart,
            Some(room_id),
            payload_value(&TypingPayload {
                user_id: user_id.as_str().to_string(),
                user_name: Some(user_name.clone()),
            })?,
        ),
        OutboundFrame::TypingStop { room_id, user_id } => (
            FrameType::TypingStop,
            Some(room_id),
            payload_value(&TypingPayload {
                user_id: user_id.as_str().to_string(),
                user_name: None,
            })?,
        ),
        OutboundFrame::PresenceHeartbeat { user_id } => (
            FrameType::PresenceHeartbeat,
            None,
            payload_value(&PresencePayload {
                user_id: user_id.as_str().to_string(),
                online: true,
            })?,
        ),
        OutboundFrame::PresenceSubscribe { user_ids } => (
            FrameType::PresenceSubscribe,
            None,
            watch_payload(user_ids)?,
        ),
        OutboundFrame::PresenceUnsubscribe { user_ids } => (
            FrameType::PresenceUnsubscribe,
            None,
            watch_payload(user_ids)?,
        ),
        OutboundFrame::Ping => (FrameType::Ping, None, empty_payload()),
        OutboundFrame::Pong => (FrameType::Pong, None, empty_payload()),
    };

    let raw = RawFrame {
        r#type: frame_type,
        room_id: room_id.map(|r| r.as_str().to_string()),
        payload,
        timestamp: timestamp.value(),
    };
    serde_json::to_string(&raw).map_err(|e| FrameError::Encode(e.to_string()))
}

fn required_room(raw: &RawFrame) -> Result<RoomId, FrameError> {
    let room_id = raw.room_id.clone().ok_or(FrameError::MissingField {
        frame_type: raw.r#type.name(),
        field: "room_id",
    })?;
    Ok(RoomId::new(room_id)?)
}

fn payload_of<T: DeserializeOwned>(payload: Value) -> Result<T, FrameError> {
    serde_json::from_value(payload).map_err(|e| FrameError::Malformed(e.to_string()))
}

fn payload_value<T: Serialize>(payload: &T) -> Result<Value, FrameError> {
    serde_json::to_value(payload).map_err(|e| FrameError::Encode(e.to_string()))
}

fn watch_payload(user_ids: &[UserId]) -> Result<Value, FrameError> {
    payload_value(&PresenceWatchPayload {
        user_ids: user_ids.iter().map(|u| u.as_str().to_string()).collect(),
    })
}

fn empty_payload() -> Value {
    Value::Object(Default::default())
}
