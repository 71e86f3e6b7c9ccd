//! Transport abstraction for the push channel.
//!
//! The channel owns protocol and state; a transport only moves frames.
//! This allows WebSocket, in-memory and scripted test implementations.

use crate::error::SyncResult;
use async_trait::async_trait;
use finsync_model::{InboundFrame, OutboundFrame};
use std::sync::Arc;

/// Opens streaming connections to the push endpoint.
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    /// Opens a connection.
    ///
    /// Returns [`crate::SyncError::Auth`] if the endpoint refuses the
    /// connection for authentication reasons; any other error is treated
    /// as transient and retried.
    async fn connect(&self, endpoint: &str) -> SyncResult<Box<dyn PushConnection>>;
}

#[async_trait]
impl<T: PushTransport + ?Sized> PushTransport for Arc<T> {
    async fn connect(&self, endpoint: &str) -> SyncResult<Box<dyn PushConnection>> {
        (**self).connect(endpoint).await
    }
}

/// One open streaming connection.
#[async_trait]
pub trait PushConnection: Send {
    /// Sends a frame.
    async fn send(&mut self, frame: OutboundFrame) -> SyncResult<()>;

    /// Receives the next frame.
    ///
    /// Returns `None` once the peer has closed the connection. A
    /// [`crate::SyncError::Protocol`] error means one undecodable frame was
    /// skipped; other errors end the connection.
    ///
    /// Must be cancel-safe: the channel polls it inside `select!`.
    async fn recv(&mut self) -> Option<SyncResult<InboundFrame>>;

    /// Closes the connection.
    async fn close(&mut self) -> SyncResult<()>;
}
