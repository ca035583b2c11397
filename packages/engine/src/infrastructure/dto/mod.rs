//! Data Transfer Objects (DTOs) for the wire protocol.

pub mod frame;
