//! Transport implementations of the domain `Connector` / `Link` traits.

pub mod websocket;

pub use websocket::{WebSocketConnector, WebSocketLink};
