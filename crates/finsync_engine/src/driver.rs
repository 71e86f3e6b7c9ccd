//! The engine's single mutation task.
//!
//! Fetch results, channel events, refresh requests and timers are all
//! funneled through one input queue and handled in order, so the store is
//! only ever written from this task.

use crate::channel::{ChannelEvent, ConnectionState};
use crate::config::{RetryConfig, SyncConfig};
use crate::engine::SyncStats;
use crate::error::{SyncError, SyncResult};
use crate::gateway::{FetchGateway, FetchParams, FetchResponse};
use crate::reconciler::{ReconcileReport, Reconciler};
use finsync_model::CollectionType;
use finsync_storage::CacheStore;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a refresh of every collection was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefreshReason {
    Startup,
    Periodic,
    Reconnect,
    Degraded,
    Manual,
}

pub(crate) enum Input {
    Fetched {
        collection: CollectionType,
        issued_at: u64,
        result: SyncResult<FetchResponse>,
    },
    Channel(ChannelEvent),
    Refresh(RefreshReason),
}

pub(crate) struct Driver<G, C> {
    pub(crate) config: SyncConfig,
    pub(crate) reconciler: Reconciler,
    pub(crate) gateway: Arc<G>,
    pub(crate) cache: Arc<C>,
    pub(crate) stats: Arc<RwLock<SyncStats>>,
    pub(crate) inputs: mpsc::UnboundedReceiver<Input>,
    pub(crate) sender: mpsc::UnboundedSender<Input>,
    pub(crate) cancel: CancellationToken,
    /// Collections with a fetch in flight, and whether another is owed.
    pub(crate) in_flight: HashMap<CollectionType, bool>,
    pub(crate) dirty: BTreeSet<CollectionType>,
    pub(crate) flush_at: Option<Instant>,
    pub(crate) ever_subscribed: bool,
    pub(crate) reconnect_pending: bool,
}

impl<G, C> Driver<G, C>
where
    G: FetchGateway,
    C: CacheStore + 'static,
{
    pub(crate) async fn run(mut self) {
        let mut refresh = self.config.refresh_interval.filter(|p| !p.is_zero()).map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let flush_at = self.flush_at;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(input) = self.inputs.recv() => self.handle(input),
                _ = tick(&mut refresh) => self.refresh_all(RefreshReason::Periodic),
                _ = sleep_until(flush_at) => self.flush().await,
            }
        }
        debug!("sync driver stopped");
    }

    fn handle(&mut self, input: Input) {
        match input {
            Input::Fetched {
                collection,
                issued_at,
                result,
            } => self.on_fetched(collection, issued_at, result),
            Input::Channel(event) => self.on_channel(event),
            Input::Refresh(reason) => self.refresh_all(reason),
        }
    }

    fn on_fetched(&mut self, collection: CollectionType, issued_at: u64, result: SyncResult<FetchResponse>) {
        let owed = self.in_flight.remove(&collection).unwrap_or(false);
        match result {
            Ok(response) => {
                let report = self.reconciler.apply_bulk(collection, response, issued_at);
                {
                    let mut stats = self.stats.write();
                    stats.fetches_succeeded += 1;
                    stats.stale_dropped += report.stale as u64;
                    stats.entities_removed += report.removed as u64;
                    stats.last_fetch_at = Some(std::time::Instant::now());
                }
                self.record_changes(collection, report);
            }
            Err(e) => {
                warn!(%collection, error = %e, "bulk fetch failed");
                let mut stats = self.stats.write();
                stats.fetches_failed += 1;
                stats.last_error = Some(e.to_string());
            }
        }
        if owed {
            self.fetch(collection);
        }
    }

    fn on_channel(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Event(event) => {
                let collection = event.collection;
                if !self.config.collections.contains(&collection) {
                    debug!(%collection, "event for unsynchronized collection ignored");
                    return;
                }
                let report = self.reconciler.apply_delta(event);
                {
                    let mut stats = self.stats.write();
                    if report.changed() {
                        stats.events_applied += 1;
                    }
                    stats.stale_dropped += report.stale as u64;
                    stats.entities_removed += report.removed as u64;
                }
                self.record_changes(collection, report);
            }
            ChannelEvent::StateChanged(ConnectionState::Subscribed) => {
                if self.reconnect_pending {
                    self.reconnect_pending = false;
                    {
                        let mut stats = self.stats.write();
                        stats.reconnects += 1;
                        stats.forced_refreshes += 1;
                    }
                    self.refresh_all(RefreshReason::Reconnect);
                }
                self.ever_subscribed = true;
            }
            ChannelEvent::StateChanged(ConnectionState::Degraded) => {
                self.stats.write().forced_refreshes += 1;
                self.refresh_all(RefreshReason::Degraded);
            }
            ChannelEvent::StateChanged(state) => {
                // Events missed until the next subscription are unrecoverable from the stream.
                if !state.is_live() && self.ever_subscribed {
                    self.reconnect_pending = true;
                }
            }
            ChannelEvent::ReconnectScheduled { .. } => {}
            ChannelEvent::AuthRejected(reason) => {
                let mut stats = self.stats.write();
                stats.auth_failures += 1;
                stats.last_error = Some(SyncError::Auth(reason).to_string());
            }
        }
    }

    fn record_changes(&mut self, collection: CollectionType, report: ReconcileReport) {
        if !report.changed() {
            return;
        }
        self.dirty.insert(collection);
        if self.flush_at.is_none() {
            self.flush_at = Some(Instant::now() + self.config.cache_debounce);
        }
    }

    fn refresh_all(&mut self, reason: RefreshReason) {
        info!(?reason, "refreshing all collections");
        for collection in self.config.collections.clone() {
            self.fetch(collection);
        }
    }

    /// Issues a bulk fetch, or marks one as owed if a fetch is already in flight.
    fn fetch(&mut self, collection: CollectionType) {
        if let Some(owed) = self.in_flight.get_mut(&collection) {
            *owed = true;
            return;
        }
        self.in_flight.insert(collection, false);
        self.stats.write().fetches_issued += 1;

        let issued_at = self.reconciler.store().sequence();
        let gateway = Arc::clone(&self.gateway);
        let params = self.config.fetch_params.clone();
        let retry = self.config.fetch_retry.clone();
        let timeout = self.config.request_timeout;
        let sender = self.sender.clone();
        let cancel = self.cancel.clone();

        debug!(%collection, issued_at, "bulk fetch issued");
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = fetch_with_retry(gateway.as_ref(), collection, &params, &retry, timeout) => result,
            };
            let _ = sender.send(Input::Fetched {
                collection,
                issued_at,
                result,
            });
        });
    }

    async fn flush(&mut self) {
        self.flush_at = None;
        let dirty = std::mem::take(&mut self.dirty);
        for collection in dirty {
            persist(self.cache.as_ref(), &self.reconciler, collection).await;
        }
    }
}

/// Saves the current state of one collection; failures are logged only.
pub(crate) async fn persist<C: CacheStore + ?Sized>(cache: &C, reconciler: &Reconciler, collection: CollectionType) -> bool {
    let entities = reconciler.store().get_all(collection);
    match cache.save(collection, &entities).await {
        Ok(()) => {
            debug!(%collection, count = entities.len(), "cache snapshot saved");
            true
        }
        Err(e) => {
            warn!(%collection, error = %e, "cache save failed");
            false
        }
    }
}

pub(crate) async fn fetch_with_retry<G: FetchGateway + ?Sized>(
    gateway: &G,
    collection: CollectionType,
    params: &FetchParams,
    retry: &RetryConfig,
    timeout: Duration,
) -> SyncResult<FetchResponse> {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        let delay = retry.delay_for_attempt(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = match tokio::time::timeout(timeout, gateway.fetch_collection(collection, params)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        };
        match result {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                debug!(%collection, attempt, error = %e, "fetch attempt failed; retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
