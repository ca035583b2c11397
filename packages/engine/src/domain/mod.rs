//! Domain layer for the synchronization engine.
//!
//! This module contains the vocabulary of the engine (identities, messages,
//! receipts, typing and presence state) independent of the wire format and
//! of the transport implementation.

pub mod entity;
pub mod error;
pub mod factory;
pub mod frame;
pub mod transport;
pub mod value_object;

pub use entity::{
    ConnectionStatus, DeliveryState, Message, PresenceEntry, ReadReceipt, Session, TypingSignal,
};
pub use error::{FrameError, SyncError, TransportError, ValueObjectError};
pub use factory::MessageIdFactory;
pub use frame::{InboundFrame, OutboundFrame, RemoteMessage};
pub use transport::{Connector, Link};
pub use value_object::{AuthToken, MessageBody, MessageId, RoomId, Timestamp, UserId};
