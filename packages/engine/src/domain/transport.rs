//! Transport abstraction.
//!
//! The domain defines what a duplex connection must provide; the
//! infrastructure layer supplies the WebSocket implementation and tests
//! supply in-memory fakes (dependency inversion).

use async_trait::async_trait;

use super::{AuthToken, error::TransportError};

/// Opens authenticated duplex links to a messaging endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new link, presenting `token` during the handshake.
    ///
    /// Returns `TransportError::AuthRejected` when the server refuses the token.
    async fn connect(&self, endpoint: &str, token: &AuthToken)
    -> Result<Box<dyn Link>, TransportError>;
}

/// One established connection carrying text frames.
#[async_trait]
pub trait Link: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound text frame; `None` once the peer closed the link.
    ///
    /// Must be cancel-safe: the event loop polls it inside `select!`.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self);
}
