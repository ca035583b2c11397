//! Infrastructure layer
//!
//! Wire format, connection lifecycle and the concrete WebSocket transport.

pub mod connection;
pub mod dto;
pub mod transport;
