//! An in-memory push endpoint driven from the test.
//!
//! [`ScriptedTransport`] decides per connect attempt whether to refuse,
//! reject the credential, or accept. Each accepted connection yields a
//! [`ServerHandle`] through which the test plays the backend: it reads the
//! client's frames and sends acknowledgements, heartbeats and events.
//! Dropping the handle closes the connection from the server side.

use crate::fixtures::WAIT;
use async_trait::async_trait;
use finsync_engine::{PushConnection, PushTransport, SyncError, SyncResult};
use finsync_model::{
    CollectionType, Credentials, Entity, EntityId, InboundFrame, OutboundFrame, Version,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// What the transport does on one connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Fail with a retryable network error.
    Refuse,
    /// Fail the handshake with an authentication error.
    RejectAuth,
    /// Open a connection and hand its server side to the test.
    Accept,
}

struct TransportInner {
    script: Mutex<VecDeque<Step>>,
    fallback: Mutex<Step>,
    attempts: AtomicUsize,
    servers_tx: tokio::sync::mpsc::UnboundedSender<ServerHandle>,
    servers_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<ServerHandle>>,
}

/// A [`PushTransport`] following a script of connect outcomes.
///
/// Clones share state.
#[derive(Clone)]
pub struct ScriptedTransport {
    inner: Arc<TransportInner>,
}

impl ScriptedTransport {
    /// Creates a transport that applies `fallback` once the script is exhausted.
    pub fn new(fallback: Step) -> Self {
        let (servers_tx, servers_rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            inner: Arc::new(TransportInner {
                script: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(fallback),
                attempts: AtomicUsize::new(0),
                servers_tx,
                servers_rx: tokio::sync::Mutex::new(servers_rx),
            }),
        }
    }

    /// Accepts every connection.
    pub fn accepting() -> Self {
        Self::new(Step::Accept)
    }

    /// Refuses every connection.
    pub fn refusing() -> Self {
        Self::new(Step::Refuse)
    }

    /// Appends steps to the script.
    pub fn then(&self, steps: impl IntoIterator<Item = Step>) -> &Self {
        self.inner.script.lock().extend(steps);
        self
    }

    /// Changes the behavior once the script is exhausted.
    pub fn set_fallback(&self, step: Step) {
        *self.inner.fallback.lock() = step;
    }

    /// Returns the number of connect attempts so far.
    pub fn connect_attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Waits for the next accepted connection.
    ///
    /// Panics if none arrives within [`WAIT`].
    pub async fn next_server(&self) -> ServerHandle {
        let mut servers = self.inner.servers_rx.lock().await;
        tokio::time::timeout(WAIT, servers.recv())
            .await
            .expect("no connection accepted in time")
            .expect("transport dropped")
    }

    fn next_step(&self) -> Step {
        self.inner
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| *self.inner.fallback.lock())
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn connect(&self, _endpoint: &str) -> SyncResult<Box<dyn PushConnection>> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Refuse => Err(SyncError::network_retryable("connection refused")),
            Step::RejectAuth => Err(SyncError::Auth("handshake refused with 401".into())),
            Step::Accept => {
                let (to_server, from_client) = tokio::sync::mpsc::unbounded_channel();
                let (to_client, from_server) = tokio::sync::mpsc::unbounded_channel();
                let closed = Arc::new(AtomicBool::new(false));
                let server = ServerHandle {
                    to_client,
                    from_client,
                    closed: Arc::clone(&closed),
                };
                let _ = self.inner.servers_tx.send(server);
                Ok(Box::new(ScriptedConnection {
                    to_server,
                    from_server,
                    closed,
                }))
            }
        }
    }
}

/// What the server side pushes to the client.
enum ServerMessage {
    Frame(InboundFrame),
    Error(SyncError),
}

struct ScriptedConnection {
    to_server: tokio::sync::mpsc::UnboundedSender<OutboundFrame>,
    from_server: tokio::sync::mpsc::UnboundedReceiver<ServerMessage>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl PushConnection for ScriptedConnection {
    async fn send(&mut self, frame: OutboundFrame) -> SyncResult<()> {
        self.to_server
            .send(frame)
            .map_err(|_| SyncError::network_retryable("server gone"))
    }

    async fn recv(&mut self) -> Option<SyncResult<InboundFrame>> {
        match self.from_server.recv().await? {
            ServerMessage::Frame(frame) => Some(Ok(frame)),
            ServerMessage::Error(e) => Some(Err(e)),
        }
    }

    async fn close(&mut self) -> SyncResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.from_server.close();
        Ok(())
    }
}

/// The server side of one accepted connection.
pub struct ServerHandle {
    to_client: tokio::sync::mpsc::UnboundedSender<ServerMessage>,
    from_client: tokio::sync::mpsc::UnboundedReceiver<OutboundFrame>,
    closed: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Sends a frame to the client.
    pub fn send(&self, frame: InboundFrame) {
        let _ = self.to_client.send(ServerMessage::Frame(frame));
    }

    /// Acknowledges the credential.
    pub fn ack(&self) {
        self.send(InboundFrame::AuthAck {
            session_id: Some("test-session".into()),
        });
    }

    /// Rejects the credential.
    pub fn reject(&self, reason: &str) {
        self.send(InboundFrame::AuthRejected {
            reason: reason.into(),
        });
    }

    /// Sends a heartbeat.
    pub fn heartbeat(&self) {
        self.send(InboundFrame::Heartbeat);
    }

    /// Pushes an upsert.
    pub fn upsert(&self, collection: CollectionType, entity: Entity) {
        self.send(InboundFrame::Upsert { collection, entity });
    }

    /// Pushes a deletion marker.
    pub fn delete(&self, collection: CollectionType, id: &str, version: u64) {
        self.send(InboundFrame::Delete {
            collection,
            id: EntityId::new(id),
            version: Version::new(version),
        });
    }

    /// Delivers an undecodable frame.
    pub fn garbage(&self, detail: &str) {
        let _ = self
            .to_client
            .send(ServerMessage::Error(SyncError::Protocol(detail.into())));
    }

    /// Fails the connection with a transport error.
    pub fn fail(&self, message: &str) {
        let _ = self
            .to_client
            .send(ServerMessage::Error(SyncError::network_retryable(message)));
    }

    /// Receives the next client frame.
    ///
    /// Panics if none arrives within [`WAIT`] or the client went away.
    pub async fn next_frame(&mut self) -> OutboundFrame {
        tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("client sent nothing in time")
            .expect("client closed the connection")
    }

    /// Expects the authenticate frame and returns its credential.
    pub async fn expect_authenticate(&mut self) -> Credentials {
        match self.next_frame().await {
            OutboundFrame::Authenticate { token } => Credentials::new(token),
            other => panic!("expected authenticate, got {:?}", other),
        }
    }

    /// Expects `count` subscribe frames and returns their collections.
    pub async fn expect_subscriptions(&mut self, count: usize) -> Vec<CollectionType> {
        let mut collections = Vec::with_capacity(count);
        for _ in 0..count {
            match self.next_frame().await {
                OutboundFrame::Subscribe { collection } => collections.push(collection),
                other => panic!("expected subscribe, got {:?}", other),
            }
        }
        collections
    }

    /// Plays a full successful handshake for `collections` subscriptions.
    pub async fn handshake(&mut self, collections: usize) -> Vec<CollectionType> {
        self.expect_authenticate().await;
        self.ack();
        self.expect_subscriptions(collections).await
    }

    /// Returns true once the client closed its side.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closes the connection from the server side.
    pub fn disconnect(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_then_fallback() {
        let transport = ScriptedTransport::accepting();
        transport.then([Step::Refuse, Step::RejectAuth]);

        assert!(transport.connect("ws://x").await.err().unwrap().is_retryable());
        assert!(transport.connect("ws://x").await.err().unwrap().is_auth());
        let mut conn = transport.connect("ws://x").await.unwrap();
        assert_eq!(transport.connect_attempts(), 3);

        let mut server = transport.next_server().await;
        conn.send(OutboundFrame::Authenticate { token: "t".into() }).await.unwrap();
        assert_eq!(server.expect_authenticate().await, Credentials::new("t"));

        server.heartbeat();
        assert_eq!(conn.recv().await.unwrap().unwrap(), InboundFrame::Heartbeat);

        server.disconnect();
        assert!(conn.recv().await.is_none());
    }
}
