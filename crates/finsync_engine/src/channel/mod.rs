//! Push channel: one streaming connection with a formal state machine.
//!
//! The channel connects, authenticates with the session credential, waits
//! for an explicit acknowledgement, then subscribes to every configured
//! collection. Missed heartbeats degrade the channel without closing it;
//! a lost connection is retried forever with exponential backoff and full
//! jitter, reset on every successful subscription.
//!
//! An authentication rejection is the only condition that stops retries:
//! the channel parks in [`ConnectionState::Disconnected`] until
//! [`PushChannel::connect`] is called again with fresh credentials.

mod state;
mod transport;

pub use state::ConnectionState;
pub use transport::{PushConnection, PushTransport};

use crate::config::{Backoff, BackoffConfig, HeartbeatConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use finsync_model::{CollectionType, Credentials, InboundFrame, OutboundFrame, PushEvent};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration of a [`PushChannel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Endpoint passed to the transport.
    pub endpoint: String,
    /// Collections subscribed after every acknowledgement.
    pub collections: Vec<CollectionType>,
    /// Reconnect policy.
    pub reconnect: BackoffConfig,
    /// Heartbeat expectations.
    pub heartbeat: HeartbeatConfig,
    /// Timeout for opening the transport connection.
    pub connect_timeout: Duration,
}

impl ChannelConfig {
    /// Creates a configuration for all collections with default policies.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::from(&SyncConfig::new(endpoint))
    }

    /// Sets the subscribed collections.
    pub fn with_collections(mut self, collections: Vec<CollectionType>) -> Self {
        self.collections = collections;
        self
    }

    /// Sets the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: BackoffConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the heartbeat expectations.
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl From<&SyncConfig> for ChannelConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            collections: config.collections.clone(),
            reconnect: config.reconnect.clone(),
            heartbeat: config.heartbeat.clone(),
            connect_timeout: config.request_timeout,
        }
    }
}

/// Notifications emitted by the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A live delta arrived.
    Event(PushEvent),
    /// The connection was lost; the next attempt is scheduled.
    ReconnectScheduled {
        /// Consecutive failures since the last subscription.
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// The backend refused the credential. The channel is parked.
    AuthRejected(String),
}

type Listener = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

struct SessionHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    listeners: RwLock<Vec<Listener>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<OutboundFrame>>>,
    session: Mutex<Option<SessionHandle>>,
    /// Incremented per `connect`; a superseded run loop can no longer publish.
    generation: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, generation: u64, state: ConnectionState) {
        if !self.is_current(generation) {
            return;
        }
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            info!(%state, "push channel state changed");
            self.emit(generation, &ChannelEvent::StateChanged(state));
        }
    }

    fn emit(&self, generation: u64, event: &ChannelEvent) {
        if !self.is_current(generation) {
            return;
        }
        let listeners: Vec<Listener> = self.listeners.read().clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!("channel event listener panicked");
            }
        }
    }
}

/// Owns one streaming connection to the push endpoint.
pub struct PushChannel {
    shared: Arc<Shared>,
    transport: Arc<dyn PushTransport>,
    config: ChannelConfig,
}

impl PushChannel {
    /// Creates a disconnected channel.
    pub fn new<T: PushTransport>(config: ChannelConfig, transport: T) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                state_tx,
                listeners: RwLock::new(Vec::new()),
                outbound: Mutex::new(None),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
            transport: Arc::new(transport),
            config,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Starts connecting with the given credentials.
    ///
    /// Any running session is replaced. Returns immediately; progress is
    /// reported through [`PushChannel::watch_state`] and
    /// [`PushChannel::on_event`]. Must be called within a Tokio runtime.
    pub fn connect(&self, credentials: Credentials) -> SyncResult<()> {
        let mut session = self.shared.session.lock();
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(SyncError::Closed);
        }
        if let Some(previous) = session.take() {
            debug!("replacing running push session");
            previous.cancel.cancel();
            previous.task.abort();
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *self.shared.outbound.lock() = Some(outbound_tx);

        let cancel = CancellationToken::new();
        let runner = Runner {
            shared: Arc::clone(&self.shared),
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            credentials,
            generation,
            cancel: cancel.clone(),
            outbound: outbound_rx,
            backoff: self.config.reconnect.build(),
        };
        let task = tokio::spawn(runner.run());
        *session = Some(SessionHandle { cancel, task });
        Ok(())
    }

    /// Sends a frame on the live connection.
    pub fn send(&self, frame: OutboundFrame) -> SyncResult<()> {
        if !self.shared.state().is_live() {
            return Err(SyncError::NotConnected);
        }
        self.shared
            .outbound
            .lock()
            .as_ref()
            .ok_or(SyncError::NotConnected)?
            .send(frame)
            .map_err(|_| SyncError::NotConnected)
    }

    /// Registers a listener for every channel event.
    ///
    /// Listeners run on the channel task and must not block.
    pub fn on_event<F>(&self, listener: F)
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.write().push(Arc::new(listener));
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Returns a receiver observing every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Returns true once [`PushChannel::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Closes the connection and refuses further reconnect attempts.
    ///
    /// Idempotent. Waits for the run loop to finish.
    pub async fn close(&self) {
        let handle = {
            let mut session = self.shared.session.lock();
            self.shared.closed.store(true, Ordering::SeqCst);
            session.take()
        };
        *self.shared.outbound.lock() = None;

        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                if e.is_panic() {
                    error!("push channel task panicked");
                }
            }
        }
        let generation = self.shared.generation.load(Ordering::SeqCst);
        self.shared.set_state(generation, ConnectionState::Disconnected);
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.shared.session.lock().take() {
            handle.cancel.cancel();
            handle.task.abort();
        }
    }
}

impl std::fmt::Debug for PushChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushChannel")
            .field("endpoint", &self.config.endpoint)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

enum SessionEnd {
    Cancelled,
    Lost(String),
    Rejected(String),
}

/// The connection loop of one `connect` call.
struct Runner {
    shared: Arc<Shared>,
    transport: Arc<dyn PushTransport>,
    config: ChannelConfig,
    credentials: Credentials,
    generation: u64,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    backoff: Backoff,
}

impl Runner {
    fn set_state(&self, state: ConnectionState) {
        self.shared.set_state(self.generation, state);
    }

    fn emit(&self, event: ChannelEvent) {
        self.shared.emit(self.generation, &event);
    }

    fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);
            let end = match self.open().await {
                Ok(conn) => self.session(conn).await,
                Err(SyncError::Closed) => SessionEnd::Cancelled,
                Err(e) if e.is_auth() => SessionEnd::Rejected(e.to_string()),
                Err(e) => SessionEnd::Lost(e.to_string()),
            };

            match end {
                SessionEnd::Cancelled => break,
                SessionEnd::Rejected(reason) => {
                    error!(%reason, "push channel authentication rejected");
                    self.set_state(ConnectionState::Disconnected);
                    self.emit(ChannelEvent::AuthRejected(reason));
                    return;
                }
                SessionEnd::Lost(reason) => {
                    warn!(%reason, "push connection lost");
                    self.set_state(ConnectionState::Disconnected);
                }
            }

            // Frames queued for the lost connection are meaningless on the next one.
            while self.outbound.try_recv().is_ok() {}

            let delay = self.backoff.next_delay();
            let attempt = self.backoff.attempts();
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
            self.emit(ChannelEvent::ReconnectScheduled { attempt, delay });

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn open(&self) -> SyncResult<Box<dyn PushConnection>> {
        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            self.transport.connect(&self.config.endpoint),
        );
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SyncError::Closed),
            result = connect => match result {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout),
            },
        }
    }

    async fn session(&mut self, mut conn: Box<dyn PushConnection>) -> SessionEnd {
        self.set_state(ConnectionState::Authenticating);
        let authenticate = OutboundFrame::Authenticate {
            token: self.credentials.token.clone(),
        };
        let end = match conn.send(authenticate).await {
            Ok(()) => self.pump(conn.as_mut()).await,
            Err(e) => SessionEnd::Lost(e.to_string()),
        };
        if let Err(e) = conn.close().await {
            debug!(error = %e, "error closing push connection");
        }
        end
    }

    async fn pump(&mut self, conn: &mut dyn PushConnection) -> SessionEnd {
        let silence = self.config.heartbeat.silence_limit();
        let mut deadline = Instant::now() + silence;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,

                Some(frame) = self.outbound.recv() => {
                    if let Err(e) = conn.send(frame).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }

                incoming = conn.recv() => match incoming {
                    None => return SessionEnd::Lost("closed by peer".into()),
                    Some(Err(SyncError::Protocol(message))) => {
                        warn!(error = %message, "skipping undecodable frame");
                    }
                    Some(Err(e)) if e.is_auth() => return SessionEnd::Rejected(e.to_string()),
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    Some(Ok(frame)) => {
                        deadline = Instant::now() + silence;
                        if let Some(end) = self.handle(conn, frame).await {
                            return end;
                        }
                    }
                },

                _ = tokio::time::sleep_until(deadline) => match self.state() {
                    ConnectionState::Subscribed => {
                        warn!(silence_ms = silence.as_millis() as u64, "heartbeats missed; push channel degraded");
                        self.set_state(ConnectionState::Degraded);
                        deadline = Instant::now() + silence;
                    }
                    state => return SessionEnd::Lost(format!("no traffic while {}", state)),
                },
            }
        }
    }

    async fn handle(&mut self, conn: &mut dyn PushConnection, frame: InboundFrame) -> Option<SessionEnd> {
        debug!(kind = frame.kind(), "frame received");
        match frame {
            InboundFrame::AuthAck { session_id } => {
                if self.state() != ConnectionState::Authenticating {
                    debug!("ignoring repeated auth ack");
                    return None;
                }
                info!(session = session_id.as_deref().unwrap_or("-"), "push channel authenticated");
                for &collection in &self.config.collections {
                    if let Err(e) = conn.send(OutboundFrame::Subscribe { collection }).await {
                        return Some(SessionEnd::Lost(e.to_string()));
                    }
                }
                self.backoff.reset();
                self.set_state(ConnectionState::Subscribed);
            }
            InboundFrame::AuthRejected { reason } => return Some(SessionEnd::Rejected(reason)),
            InboundFrame::Heartbeat => self.recover(),
            frame => {
                self.recover();
                if let Some(event) = frame.into_event() {
                    self.emit(ChannelEvent::Event(event));
                }
            }
        }
        None
    }

    fn recover(&self) {
        if self.state() == ConnectionState::Degraded {
            info!("push channel recovered");
            self.set_state(ConnectionState::Subscribed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Refusing;

    #[async_trait]
    impl PushTransport for Refusing {
        async fn connect(&self, _endpoint: &str) -> SyncResult<Box<dyn PushConnection>> {
            Err(SyncError::network_retryable("connection refused"))
        }
    }

    fn channel() -> PushChannel {
        let config = ChannelConfig::new("ws://test")
            .with_reconnect(BackoffConfig::new(Duration::from_secs(60), Duration::from_secs(60)));
        PushChannel::new(config, Refusing)
    }

    #[tokio::test]
    async fn send_requires_live_connection() {
        let channel = channel();
        let frame = OutboundFrame::Subscribe {
            collection: CollectionType::Wallets,
        };
        assert_eq!(channel.send(frame), Err(SyncError::NotConnected));
    }

    #[tokio::test]
    async fn connect_after_close_is_refused() {
        let channel = channel();
        channel.close().await;
        channel.close().await;
        assert!(channel.is_closed());
        assert_eq!(channel.connect(Credentials::new("t")), Err(SyncError::Closed));
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn failed_connect_schedules_reconnect() {
        let channel = channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        channel.on_event(move |event| {
            let _ = tx.send(event.clone());
        });

        channel.connect(Credentials::new("t")).unwrap();
        loop {
            match rx.recv().await.unwrap() {
                ChannelEvent::ReconnectScheduled { attempt, .. } => {
                    assert_eq!(attempt, 1);
                    break;
                }
                ChannelEvent::StateChanged(_) => {}
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        channel.close().await;
    }

    #[tokio::test]
    async fn panicking_listener_does_not_stop_others() {
        let channel = channel();
        channel.on_event(|_| panic!("listener bug"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        channel.on_event(move |event| {
            let _ = tx.send(event.clone());
        });

        channel.connect(Credentials::new("t")).unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelEvent::StateChanged(ConnectionState::Connecting)
        );
        channel.close().await;
    }
}
