//! A scriptable bulk fetch backend.

use async_trait::async_trait;
use finsync_engine::{FetchGateway, FetchParams, FetchResponse, SyncError, SyncResult};
use finsync_model::{CollectionType, Entity};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct GatewayInner {
    responses: Mutex<HashMap<CollectionType, FetchResponse>>,
    queued: Mutex<HashMap<CollectionType, VecDeque<SyncResult<FetchResponse>>>>,
    calls: Mutex<Vec<CollectionType>>,
    delay: Mutex<Option<Duration>>,
    offline: AtomicBool,
    called: Notify,
}

/// A [`FetchGateway`] answering from canned responses.
///
/// Clones share state, so a test can keep one handle and give another to
/// the engine. Every attempt is recorded, including retries.
#[derive(Clone, Default)]
pub struct MockGateway {
    inner: Arc<GatewayInner>,
}

impl MockGateway {
    /// Creates a gateway returning empty partial responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a gateway that fails every fetch with a retryable error.
    pub fn offline() -> Self {
        let gateway = Self::new();
        gateway.set_offline(true);
        gateway
    }

    /// Sets the standing response for a collection.
    pub fn set_response(&self, collection: CollectionType, response: FetchResponse) {
        self.inner.responses.lock().insert(collection, response);
    }

    /// Sets an exhaustive standing response for a collection.
    pub fn set_entities(&self, collection: CollectionType, entities: Vec<Entity>) {
        self.set_response(collection, FetchResponse::exhaustive(entities));
    }

    /// Queues a one-shot result, used before the standing response.
    pub fn push_result(&self, collection: CollectionType, result: SyncResult<FetchResponse>) {
        self.inner
            .queued
            .lock()
            .entry(collection)
            .or_default()
            .push_back(result);
    }

    /// Makes every fetch fail with a retryable network error.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Delays every response.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.inner.delay.lock() = delay;
    }

    /// Returns every fetch attempt, in order.
    pub fn calls(&self) -> Vec<CollectionType> {
        self.inner.calls.lock().clone()
    }

    /// Returns the number of attempts for one collection.
    pub fn call_count(&self, collection: CollectionType) -> usize {
        self.inner.calls.lock().iter().filter(|c| **c == collection).count()
    }

    /// Returns the number of attempts across all collections.
    pub fn total_calls(&self) -> usize {
        self.inner.calls.lock().len()
    }

    /// Waits until at least `count` attempts have been made.
    ///
    /// Returns false on timeout.
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let called = self.inner.called.notified();
            if self.total_calls() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, called).await.is_err() {
                return self.total_calls() >= count;
            }
        }
    }
}

#[async_trait]
impl FetchGateway for MockGateway {
    async fn fetch_collection(
        &self,
        collection: CollectionType,
        _params: &FetchParams,
    ) -> SyncResult<FetchResponse> {
        self.inner.calls.lock().push(collection);
        self.inner.called.notify_waiters();

        let delay = *self.inner.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(SyncError::network_retryable("gateway offline"));
        }
        let queued = self
            .inner
            .queued
            .lock()
            .get_mut(&collection)
            .and_then(|q| q.pop_front());
        if let Some(result) = queued {
            return result;
        }
        Ok(self
            .inner
            .responses
            .lock()
            .get(&collection)
            .cloned()
            .unwrap_or_default())
    }
}
