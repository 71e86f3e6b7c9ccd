//! Session orchestrator.
//!
//! One [`SyncEngine`] runs per authenticated session. It owns the store,
//! hydrates it from the cache, issues bulk fetches, keeps the push channel
//! connected, arms the backstop refresh and persists snapshots.
//!
//! # Startup
//!
//! 1. Hydrate the store from the cache (best effort, before any network).
//! 2. Issue one bulk fetch per collection; results apply as they resolve.
//! 3. Open the push channel.
//! 4. Arm the periodic refresh.
//!
//! # Teardown
//!
//! [`SyncEngine::shutdown`] unsubscribes every surface, closes the channel,
//! cancels timers and in-flight fetches, and persists a final snapshot.
//! Every step runs even if an earlier one fails.

use crate::channel::{ChannelConfig, ChannelEvent, ConnectionState, PushChannel, PushTransport};
use crate::config::SyncConfig;
use crate::driver::{persist, Driver, Input, RefreshReason};
use crate::error::{SyncError, SyncResult};
use crate::gateway::FetchGateway;
use crate::reconciler::Reconciler;
use crate::store::{EntityStore, Snapshot, StoreReader, Subscription};
use finsync_model::{CollectionType, Credentials};
use finsync_storage::CacheStore;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`SyncEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, not yet started.
    Idle,
    /// Started; syncing.
    Running,
    /// Shut down. Cannot be restarted.
    Stopped,
}

impl EngineState {
    /// Returns the lowercase state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Running => "running",
            EngineState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Bulk fetches issued (retries of one fetch count once).
    pub fetches_issued: u64,
    /// Bulk fetches that returned a response.
    pub fetches_succeeded: u64,
    /// Bulk fetches that failed after all retries.
    pub fetches_failed: u64,
    /// Push events that changed the store.
    pub events_applied: u64,
    /// Stale representations dropped (fetch or push).
    pub stale_dropped: u64,
    /// Entities removed by deletion markers or exhaustive fetches.
    pub entities_removed: u64,
    /// Successful resubscriptions after a lost connection.
    pub reconnects: u64,
    /// Refreshes forced by reconnects or degraded heartbeats.
    pub forced_refreshes: u64,
    /// Subscriber callbacks that panicked.
    pub subscriber_failures: u64,
    /// Credential rejections by the push endpoint.
    pub auth_failures: u64,
    /// Time of the last successful bulk fetch.
    pub last_fetch_at: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// The sync engine keeps an [`EntityStore`] current for one session.
pub struct SyncEngine<G: FetchGateway, C: CacheStore + 'static> {
    config: SyncConfig,
    store: EntityStore,
    gateway: Arc<G>,
    cache: Arc<C>,
    channel: PushChannel,
    state: Mutex<EngineState>,
    stats: Arc<RwLock<SyncStats>>,
    cancel: CancellationToken,
    inputs: Mutex<Option<mpsc::UnboundedSender<Input>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<G: FetchGateway, C: CacheStore + 'static> SyncEngine<G, C> {
    /// Creates an idle engine.
    pub fn new<T: PushTransport>(config: SyncConfig, gateway: G, cache: C, transport: T) -> Self {
        let channel = PushChannel::new(ChannelConfig::from(&config), transport);
        let store = EntityStore::with_tombstone_limit(config.tombstone_limit);
        Self {
            config,
            store,
            gateway: Arc::new(gateway),
            cache: Arc::new(cache),
            channel,
            state: Mutex::new(EngineState::Idle),
            stats: Arc::new(RwLock::new(SyncStats::default())),
            cancel: CancellationToken::new(),
            inputs: Mutex::new(None),
            driver: Mutex::new(None),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Starts syncing.
    ///
    /// Returns once the store has been hydrated from the cache; fetches and
    /// the push connection proceed in the background. Fails only if the
    /// engine is not idle.
    pub async fn start(&self, credentials: Credentials) -> SyncResult<()> {
        {
            let mut state = self.state.lock();
            if *state != EngineState::Idle {
                return Err(SyncError::InvalidStateTransition {
                    from: state.to_string(),
                    to: EngineState::Running.to_string(),
                });
            }
            *state = EngineState::Running;
        }
        info!(endpoint = %self.config.endpoint, collections = self.config.collections.len(), "starting sync engine");

        self.hydrate().await;

        let (sender, inputs) = mpsc::unbounded_channel();
        let listener = sender.clone();
        self.channel.on_event(move |event| {
            let _ = listener.send(Input::Channel(event.clone()));
        });

        let driver = Driver {
            config: self.config.clone(),
            reconciler: Reconciler::new(self.store.clone()),
            gateway: Arc::clone(&self.gateway),
            cache: Arc::clone(&self.cache),
            stats: Arc::clone(&self.stats),
            inputs,
            sender: sender.clone(),
            cancel: self.cancel.child_token(),
            in_flight: HashMap::new(),
            dirty: BTreeSet::new(),
            flush_at: None,
            ever_subscribed: false,
            reconnect_pending: false,
        };
        let _ = sender.send(Input::Refresh(RefreshReason::Startup));
        *self.driver.lock() = Some(tokio::spawn(driver.run()));
        *self.inputs.lock() = Some(sender);

        self.channel.connect(credentials)
    }

    async fn hydrate(&self) {
        for &collection in &self.config.collections {
            match self.cache.load(collection).await {
                Ok(entities) => {
                    let inserted = self.store.hydrate(collection, entities);
                    debug!(%collection, inserted, "hydrated from cache");
                }
                Err(e) => {
                    let e = SyncError::from(e);
                    warn!(%collection, error = %e, "cache load failed; starting empty");
                    self.stats.write().last_error = Some(e.to_string());
                }
            }
        }
    }

    /// Registers a UI surface for a collection.
    ///
    /// The callback receives the current snapshot immediately, then the
    /// full snapshot after every committed change. Dropping the returned
    /// handle unsubscribes; in-flight fetches are unaffected.
    pub fn subscribe<F>(&self, collection: CollectionType, callback: F) -> Subscription
    where
        F: Fn(Arc<Snapshot>) + Send + Sync + 'static,
    {
        self.store.subscribe(collection, callback)
    }

    /// Returns a read-only view of the store.
    pub fn store(&self) -> StoreReader {
        self.store.reader()
    }

    /// Forces an immediate bulk fetch of every collection.
    ///
    /// Does not touch the push channel's backoff.
    pub fn request_refresh(&self) -> SyncResult<()> {
        match self.state() {
            EngineState::Running => {}
            EngineState::Idle => return Err(SyncError::NotConnected),
            EngineState::Stopped => return Err(SyncError::Closed),
        }
        self.inputs
            .lock()
            .as_ref()
            .ok_or(SyncError::Closed)?
            .send(Input::Refresh(RefreshReason::Manual))
            .map_err(|_| SyncError::Closed)
    }

    /// Reconnects the push channel with fresh credentials.
    ///
    /// Required after an authentication rejection, which parks the channel.
    pub fn reauthenticate(&self, credentials: Credentials) -> SyncResult<()> {
        match self.state() {
            EngineState::Running => self.channel.connect(credentials),
            EngineState::Idle => Err(SyncError::NotConnected),
            EngineState::Stopped => Err(SyncError::Closed),
        }
    }

    /// Returns the push connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    /// Returns a receiver observing push connection state changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.channel.watch_state()
    }

    /// Registers a listener for push channel events.
    pub fn on_channel_event<F>(&self, listener: F)
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.channel.on_event(listener);
    }

    /// Returns a copy of the statistics.
    pub fn stats(&self) -> SyncStats {
        let mut stats = self.stats.read().clone();
        stats.subscriber_failures = self.store.subscriber_failures();
        stats
    }

    /// Stops syncing and persists a final snapshot.
    ///
    /// Idempotent. Errors are logged, never returned: every teardown step
    /// runs regardless of the others.
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), EngineState::Stopped);
        if previous == EngineState::Stopped {
            return;
        }
        info!("shutting down sync engine");

        let unsubscribed = self.store.clear_subscribers();
        debug!(unsubscribed, "subscribers released");

        self.channel.close().await;

        self.cancel.cancel();
        self.inputs.lock().take();
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                if e.is_panic() {
                    error!("sync driver panicked");
                }
            }
        }

        // An engine that never started holds no state worth saving.
        if previous == EngineState::Running {
            let reconciler = Reconciler::new(self.store.clone());
            let mut saved = 0;
            for &collection in &self.config.collections {
                if persist(self.cache.as_ref(), &reconciler, collection).await {
                    saved += 1;
                }
            }
            info!(saved, "final cache snapshot persisted");
        }
    }
}

impl<G: FetchGateway, C: CacheStore + 'static> Drop for SyncEngine<G, C> {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
    }
}

impl<G: FetchGateway, C: CacheStore + 'static> fmt::Debug for SyncEngine<G, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state())
            .field("connection", &self.connection_state())
            .field("store", &self.store)
            .finish()
    }
}
