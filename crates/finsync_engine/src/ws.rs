//! WebSocket push transport.
//!
//! Frames travel as JSON text messages using [`finsync_model::wire`].
//! Ping/pong is answered by tungstenite itself; application liveness is
//! tracked by the channel through heartbeat frames.

use crate::channel::{PushConnection, PushTransport};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use finsync_model::{wire, InboundFrame, OutboundFrame};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// Connects to a `ws://` or `wss://` endpoint.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Creates a transport.
    pub fn new() -> Self {
        Self
    }
}

fn connect_error(error: tungstenite::Error) -> SyncError {
    match error {
        tungstenite::Error::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            SyncError::Auth(format!("handshake refused with {}", response.status()))
        }
        tungstenite::Error::Url(e) => SyncError::network_fatal(e.to_string()),
        other => SyncError::network_retryable(other.to_string()),
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn connect(&self, endpoint: &str) -> SyncResult<Box<dyn PushConnection>> {
        debug!(endpoint, "opening websocket");
        let (stream, response) = connect_async(endpoint).await.map_err(connect_error)?;
        debug!(status = %response.status(), "websocket open");
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

/// One open WebSocket.
pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnection for WebSocketConnection {
    async fn send(&mut self, frame: OutboundFrame) -> SyncResult<()> {
        let text = wire::encode_outbound(&frame)?;
        trace!(kind = frame.kind(), "ws send");
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| SyncError::network_retryable(e.to_string()))
    }

    async fn recv(&mut self) -> Option<SyncResult<InboundFrame>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(SyncError::network_retryable(e.to_string()))),
            };
            match message {
                Message::Text(text) => {
                    trace!(%text, "ws recv");
                    return Some(wire::decode_inbound(&text).map_err(SyncError::from));
                }
                Message::Binary(bytes) => {
                    let decoded = std::str::from_utf8(&bytes)
                        .map_err(|e| SyncError::Protocol(e.to_string()))
                        .and_then(|text| wire::decode_inbound(text).map_err(SyncError::from));
                    return Some(decoded);
                }
                Message::Close(frame) => {
                    debug!(?frame, "websocket closed by peer");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) -> SyncResult<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(SyncError::network_retryable(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_url_is_fatal() {
        let error = connect_error(tungstenite::Error::Url(
            tungstenite::error::UrlError::NoHostName,
        ));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_retryable() {
        let transport = WebSocketTransport::new();
        let error = match transport.connect("ws://127.0.0.1:1/stream").await {
            Ok(_) => panic!("connected to a closed port"),
            Err(e) => e,
        };
        assert!(error.is_retryable());
    }
}
