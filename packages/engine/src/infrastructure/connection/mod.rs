//! Connection lifecycle: link ownership, heartbeat and reconnect backoff.

pub mod backoff;
pub mod manager;

pub use backoff::Backoff;
pub use manager::{ConnectionEvent, ConnectionManager, Trigger};
