//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        http::{HeaderValue, StatusCode, header::AUTHORIZATION},
    },
};

use crate::domain::{AuthToken, Connector, Link, TransportError};

/// Opens WebSocket links, presenting the token as a bearer credential.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        endpoint: &str,
        token: &AuthToken,
    ) -> Result<Box<dyn Link>, TransportError> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("invalid endpoint: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
            .map_err(|_| TransportError::Connect("token is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        match connect_async(request).await {
            Ok((stream, response)) => {
                tracing::debug!("WebSocket handshake completed ({})", response.status());
                Ok(Box::new(WebSocketLink { stream }))
            }
            Err(tungstenite::Error::Http(response))
                if matches!(
                    response.status(),
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
                ) =>
            {
                tracing::warn!("Handshake rejected with {}", response.status());
                Err(TransportError::AuthRejected)
            }
            Err(e) => Err(TransportError::Connect(e.to_string())),
        }
    }
}

/// One established WebSocket connection.
pub struct WebSocketLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Link for WebSocketLink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Binary(bytes) => return Some(binary_text(&bytes)),
                Message::Close(frame) => {
                    tracing::debug!("Server closed the WebSocket: {:?}", frame);
                    return None;
                }
                // Protocol-level ping/pong is answered by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("Error while closing WebSocket: {}", e);
        }
    }
}

// Binary frames carry the same JSON; invalid UTF-8 is a protocol error.
fn binary_text(bytes: &[u8]) -> Result<String, TransportError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| TransportError::Receive(format!("binary frame is not UTF-8: {}", e)))
}
