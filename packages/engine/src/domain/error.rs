//! Domain layer error definitions.

use thiserror::Error;

/// Errors related to Value Objects validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueObjectError {
    /// UserId validation error
    #[error("UserId cannot be empty")]
    UserIdEmpty,

    /// UserId too long error
    #[error("UserId cannot exceed {max} characters (got {actual})")]
    UserIdTooLong { max: usize, actual: usize },

    /// RoomId validation error
    #[error("RoomId cannot be empty")]
    RoomIdEmpty,

    /// RoomId too long error
    #[error("RoomId cannot exceed {max} characters (got {actual})")]
    RoomIdTooLong { max: usize, actual: usize },

    /// MessageId validation error
    #[error("MessageId cannot be empty")]
    MessageIdEmpty,

    /// MessageId too long error
    #[error("MessageId cannot exceed {max} characters (got {actual})")]
    MessageIdTooLong { max: usize, actual: usize },

    /// MessageBody validation error
    #[error("MessageBody cannot be empty")]
    MessageBodyEmpty,

    /// MessageBody too long error
    #[error("MessageBody cannot exceed {max} characters (got {actual})")]
    MessageBodyTooLong { max: usize, actual: usize },

    /// AuthToken validation error
    #[error("AuthToken cannot be empty")]
    AuthTokenEmpty,
}

/// Failures of the underlying duplex connection.
///
/// Every variant except `AuthRejected` is recovered by reconnecting.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("authentication rejected by the server")]
    AuthRejected,

    #[error("connection attempt timed out")]
    Timeout,

    #[error("connection closed by peer")]
    Closed,

    #[error("failed to send frame: {0}")]
    Send(String),

    #[error("failed to receive frame: {0}")]
    Receive(String),

    #[error("not connected")]
    NotConnected,

    #[error("no frame received within {0:?}")]
    HeartbeatTimeout(std::time::Duration),
}

/// Errors raised while decoding or encoding wire frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame of type '{frame_type}' is missing '{field}'")]
    MissingField {
        frame_type: &'static str,
        field: &'static str,
    },

    #[error("frame carries an invalid value: {0}")]
    InvalidValue(#[from] ValueObjectError),

    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// Caller-facing engine errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The server kept rejecting the token; the session will not retry.
    #[error("authentication expired; supply a fresh token and connect again")]
    AuthExpired,

    #[error("received {0} consecutive malformed frames")]
    TooManyMalformedFrames(usize),

    /// A pending `connect()` was cancelled by `disconnect()`.
    #[error("disconnected before the connection was established")]
    Disconnected,

    #[error("engine has shut down")]
    EngineClosed,

    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValueObjectError),
}
