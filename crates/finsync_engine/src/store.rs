//! Authoritative in-memory entity state.
//!
//! The store holds one keyed collection per [`CollectionType`] and enforces
//! the monotonic-version rule: for a given id, the stored version only ever
//! grows, and a late-arriving stale representation is dropped.
//!
//! Every committed mutation notifies the subscribers of that collection
//! with the **full current snapshot**, not a diff, so a surface that
//! mounts mid-stream never misses state.
//!
//! # Usage
//!
//! ```rust
//! use finsync_engine::EntityStore;
//! use finsync_model::{CollectionType, Entity};
//! use serde_json::json;
//!
//! let store = EntityStore::new();
//! let subscription = store.subscribe(CollectionType::Wallets, |snapshot| {
//!     println!("{} wallets", snapshot.len());
//! });
//!
//! assert!(store.apply(CollectionType::Wallets, Entity::new("w-1", 2, json!({}))));
//! // Older representations are ignored.
//! assert!(!store.apply(CollectionType::Wallets, Entity::new("w-1", 1, json!({}))));
//!
//! subscription.unsubscribe();
//! ```

use crate::config::DEFAULT_TOMBSTONE_LIMIT;
use finsync_model::{CollectionType, Entity, EntityId, Version};
use parking_lot::{ReentrantMutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace};

/// Result of applying one representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The id was not present; the entity was created.
    Inserted,
    /// A newer (or first authoritative) representation replaced the stored one.
    Updated,
    /// The representation was older than what is stored; dropped.
    Stale,
    /// The representation carried the stored version; nothing changed.
    Duplicate,
}

impl ApplyOutcome {
    /// Returns true if the write took effect.
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Inserted | ApplyOutcome::Updated)
    }
}

/// Result of removing one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The entity was removed.
    Removed,
    /// Nothing was stored under the id.
    Absent,
    /// The stored representation is newer than the deletion; kept.
    Stale,
}

/// Full state of one collection at one commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Collection the snapshot belongs to.
    pub collection: CollectionType,
    /// Store sequence of the last commit included.
    pub sequence: u64,
    /// Entities ordered by recency (highest version first, then by id).
    pub entities: Vec<Entity>,
}

impl Snapshot {
    /// Returns the number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Finds an entity by id.
    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| &e.id == id)
    }
}

type Callback = Arc<dyn Fn(Arc<Snapshot>) + Send + Sync>;

#[derive(Debug, Clone)]
struct Record {
    entity: Entity,
    provisional: bool,
    committed_at: u64,
}

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    version: Version,
    /// Global sequence at burial.
    buried_at: u64,
    /// Position in `burial_order`.
    rank: u64,
}

#[derive(Default)]
struct CollectionState {
    records: HashMap<EntityId, Record>,
    tombstones: HashMap<EntityId, Tombstone>,
    /// Tombstones oldest first, for eviction.
    burial_order: BTreeMap<u64, EntityId>,
    next_rank: u64,
}

impl CollectionState {
    /// Applies the monotonic-version rule to one representation.
    fn decide(&self, entity: &Entity) -> ApplyOutcome {
        if let Some(record) = self.records.get(&entity.id) {
            return if record.provisional || entity.version > record.entity.version {
                ApplyOutcome::Updated
            } else if entity.version == record.entity.version {
                ApplyOutcome::Duplicate
            } else {
                ApplyOutcome::Stale
            };
        }
        match self.tombstones.get(&entity.id) {
            Some(tombstone) if entity.version <= tombstone.version => ApplyOutcome::Stale,
            _ => ApplyOutcome::Inserted,
        }
    }

    fn write(&mut self, entity: Entity, committed_at: u64) {
        self.unbury(&entity.id);
        self.records.insert(
            entity.id.clone(),
            Record {
                entity,
                provisional: false,
                committed_at,
            },
        );
    }

    /// Records a deletion, evicting the oldest tombstones beyond `limit`.
    fn bury(&mut self, id: &EntityId, version: Version, buried_at: u64, limit: usize) {
        let version = match self.unbury(id) {
            Some(previous) => previous.version.max(version),
            None => version,
        };
        let rank = self.next_rank;
        self.next_rank += 1;
        self.tombstones.insert(
            id.clone(),
            Tombstone {
                version,
                buried_at,
                rank,
            },
        );
        self.burial_order.insert(rank, id.clone());

        while self.tombstones.len() > limit {
            let Some((_, oldest)) = self.burial_order.pop_first() else {
                break;
            };
            self.tombstones.remove(&oldest);
            trace!(id = %oldest, "tombstone evicted");
        }
    }

    fn unbury(&mut self, id: &EntityId) -> Option<Tombstone> {
        let tombstone = self.tombstones.remove(id)?;
        self.burial_order.remove(&tombstone.rank);
        Some(tombstone)
    }

    /// Drops tombstones an exhaustive result issued after their burial
    /// confirms; returns how many.
    fn prune_confirmed(&mut self, present: &HashSet<EntityId>, issued_at: u64) -> usize {
        let confirmed: Vec<EntityId> = self
            .tombstones
            .iter()
            .filter(|(id, t)| t.buried_at < issued_at && !present.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &confirmed {
            self.unbury(id);
        }
        confirmed.len()
    }

    fn sorted_entities(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self.records.values().map(|r| r.entity.clone()).collect();
        entities.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| a.id.cmp(&b.id)));
        entities
    }
}

struct Subscriber {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct Slot {
    state: RwLock<CollectionState>,
    subscribers: RwLock<Vec<Subscriber>>,
    /// Serializes commit + notification so subscribers see commits in order.
    /// Re-entrant: a callback may subscribe while its own commit notifies.
    commit: ReentrantMutex<()>,
    last_sequence: AtomicU64,
}

struct StoreInner {
    slots: [Slot; 4],
    tombstone_limit: usize,
    sequence: AtomicU64,
    next_subscriber: AtomicU64,
    subscriber_failures: AtomicU64,
}

fn slot_index(collection: CollectionType) -> usize {
    match collection {
        CollectionType::Wallets => 0,
        CollectionType::Cards => 1,
        CollectionType::Transactions => 2,
        CollectionType::Notifications => 3,
    }
}

impl StoreInner {
    fn slot(&self, collection: CollectionType) -> &Slot {
        &self.slots[slot_index(collection)]
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn snapshot(&self, collection: CollectionType) -> Arc<Snapshot> {
        let slot = self.slot(collection);
        let state = slot.state.read();
        Arc::new(Snapshot {
            collection,
            sequence: slot.last_sequence.load(Ordering::SeqCst),
            entities: state.sorted_entities(),
        })
    }

    /// Delivers the current snapshot to every subscriber of a collection.
    ///
    /// Must be called with the slot's commit lock held.
    fn notify(&self, collection: CollectionType) {
        let snapshot = self.snapshot(collection);
        let callbacks: Vec<(u64, Callback)> = self
            .slot(collection)
            .subscribers
            .read()
            .iter()
            .map(|s| (s.id, Arc::clone(&s.callback)))
            .collect();

        for (id, callback) in callbacks {
            // A callback committed again; everyone already got the newer snapshot.
            if self.slot(collection).last_sequence.load(Ordering::SeqCst) != snapshot.sequence {
                break;
            }
            self.deliver(collection, id, &callback, Arc::clone(&snapshot));
        }
    }

    fn deliver(&self, collection: CollectionType, id: u64, callback: &Callback, snapshot: Arc<Snapshot>) {
        if catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
            self.subscriber_failures.fetch_add(1, Ordering::SeqCst);
            error!(%collection, subscriber = id, "subscriber callback panicked");
        }
    }

    fn remove_subscriber(&self, collection: CollectionType, id: u64) -> bool {
        let mut subscribers = self.slot(collection).subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }
}

/// Keyed, versioned state for every collection type.
///
/// `EntityStore` is a cheap handle; clones share the same state. It is
/// owned by the sync engine and written only through the
/// [`crate::Reconciler`]. UI code reads it through [`StoreReader`].
///
/// Subscriber callbacks run synchronously on the committing task and must
/// not block. A callback may read the store or subscribe further surfaces;
/// a write from inside a callback is delivered before the outer fan-out
/// resumes, and the outer, older snapshot is then skipped.
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<StoreInner>,
}

impl EntityStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_tombstone_limit(DEFAULT_TOMBSTONE_LIMIT)
    }

    /// Creates an empty store keeping at most `limit` tombstones per
    /// collection.
    pub fn with_tombstone_limit(limit: usize) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                slots: Default::default(),
                tombstone_limit: limit,
                sequence: AtomicU64::new(0),
                next_subscriber: AtomicU64::new(1),
                subscriber_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the latest known entity with the given id.
    pub fn get(&self, collection: CollectionType, id: &EntityId) -> Option<Entity> {
        self.inner
            .slot(collection)
            .state
            .read()
            .records
            .get(id)
            .map(|r| r.entity.clone())
    }

    /// Returns every entity of a collection, most recent version first.
    pub fn get_all(&self, collection: CollectionType) -> Vec<Entity> {
        self.inner.slot(collection).state.read().sorted_entities()
    }

    /// Returns the current snapshot of a collection.
    pub fn snapshot(&self, collection: CollectionType) -> Arc<Snapshot> {
        self.inner.snapshot(collection)
    }

    /// Returns the number of entities in a collection.
    pub fn len(&self, collection: CollectionType) -> usize {
        self.inner.slot(collection).state.read().records.len()
    }

    /// Returns the global commit sequence.
    ///
    /// Every committed write increments it. Bulk fetches capture it when
    /// issued so exhaustive results can tell which records predate them.
    pub fn sequence(&self) -> u64 {
        self.inner.sequence.load(Ordering::SeqCst)
    }

    /// Returns the number of deletion tombstones held for a collection.
    pub fn tombstone_count(&self, collection: CollectionType) -> usize {
        self.inner.slot(collection).state.read().tombstones.len()
    }

    /// Returns true if the stored record came from the cache and has not
    /// yet been confirmed by a fetch or push.
    pub fn is_provisional(&self, collection: CollectionType, id: &EntityId) -> bool {
        self.inner
            .slot(collection)
            .state
            .read()
            .records
            .get(id)
            .map(|r| r.provisional)
            .unwrap_or(false)
    }

    /// Applies one representation; returns whether the write took effect.
    pub fn apply(&self, collection: CollectionType, entity: Entity) -> bool {
        self.apply_with_outcome(collection, entity).is_applied()
    }

    /// Applies one representation and reports what happened.
    pub fn apply_with_outcome(&self, collection: CollectionType, entity: Entity) -> ApplyOutcome {
        let outcomes = self.apply_batch(collection, vec![entity]);
        outcomes.into_iter().next().unwrap_or(ApplyOutcome::Duplicate)
    }

    /// Applies representations in order under one commit.
    ///
    /// Each entity is judged by the same rule as [`EntityStore::apply`];
    /// subscribers are notified once if anything changed.
    pub fn apply_batch(&self, collection: CollectionType, entities: Vec<Entity>) -> Vec<ApplyOutcome> {
        self.commit(collection, entities, None).0
    }

    /// Applies a bulk result and removes records it proves deleted.
    ///
    /// Records absent from `entities` are removed only if they were last
    /// written at or before `issued_at`; later writes (from push) are newer
    /// than the bulk result and survive. Returns per-entity outcomes and
    /// the number of removed records.
    pub fn apply_exhaustive(
        &self,
        collection: CollectionType,
        entities: Vec<Entity>,
        issued_at: u64,
    ) -> (Vec<ApplyOutcome>, usize) {
        self.commit(collection, entities, Some(issued_at))
    }

    fn commit(
        &self,
        collection: CollectionType,
        entities: Vec<Entity>,
        exhaustive_at: Option<u64>,
    ) -> (Vec<ApplyOutcome>, usize) {
        let slot = self.inner.slot(collection);
        let _commit = slot.commit.lock();

        let mut outcomes = Vec::with_capacity(entities.len());
        let mut removed = 0;
        let mut changed = false;
        {
            let mut state = slot.state.write();
            let present: HashSet<EntityId> = match exhaustive_at {
                Some(_) => entities.iter().map(|e| e.id.clone()).collect(),
                None => HashSet::new(),
            };

            for entity in entities {
                let outcome = state.decide(&entity);
                if outcome.is_applied() {
                    let sequence = self.inner.next_sequence();
                    trace!(%collection, id = %entity.id, version = %entity.version, ?outcome, "commit");
                    slot.last_sequence.store(sequence, Ordering::SeqCst);
                    state.write(entity, sequence);
                    changed = true;
                } else if outcome == ApplyOutcome::Stale {
                    debug!(%collection, id = %entity.id, version = %entity.version, "stale update ignored");
                }
                outcomes.push(outcome);
            }

            if let Some(issued_at) = exhaustive_at {
                let pruned = state.prune_confirmed(&present, issued_at);
                if pruned > 0 {
                    debug!(%collection, pruned, "tombstones confirmed by exhaustive fetch");
                }

                let doomed: Vec<(EntityId, Version, bool)> = state
                    .records
                    .iter()
                    .filter(|(id, r)| !present.contains(*id) && r.committed_at <= issued_at)
                    .map(|(id, r)| (id.clone(), r.entity.version, r.provisional))
                    .collect();

                if !doomed.is_empty() {
                    let sequence = self.inner.next_sequence();
                    for (id, version, provisional) in doomed {
                        state.records.remove(&id);
                        // Cached versions are unreliable, so they never block a later insert.
                        if !provisional {
                            state.bury(&id, version, sequence, self.inner.tombstone_limit);
                        }
                        debug!(%collection, %id, "removed by exhaustive fetch");
                        removed += 1;
                    }
                    slot.last_sequence.store(sequence, Ordering::SeqCst);
                    changed = true;
                }
            }
        }

        if changed {
            self.inner.notify(collection);
        }
        (outcomes, removed)
    }

    /// Removes an entity unconditionally.
    ///
    /// Returns true if something was removed. The removed version is
    /// remembered so older representations cannot resurrect it.
    pub fn remove(&self, collection: CollectionType, id: &EntityId) -> bool {
        let slot = self.inner.slot(collection);
        let _commit = slot.commit.lock();
        let removed = {
            let mut state = slot.state.write();
            match state.records.remove(id) {
                Some(record) => {
                    let sequence = self.inner.next_sequence();
                    if !record.provisional {
                        state.bury(id, record.entity.version, sequence, self.inner.tombstone_limit);
                    }
                    slot.last_sequence.store(sequence, Ordering::SeqCst);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.inner.notify(collection);
        }
        removed
    }

    /// Removes an entity in response to a deletion carrying `version`.
    ///
    /// The deletion loses against a stored representation with a higher
    /// version. Deleting an absent id still records the deletion version.
    pub fn remove_versioned(
        &self,
        collection: CollectionType,
        id: &EntityId,
        version: Version,
    ) -> RemoveOutcome {
        let slot = self.inner.slot(collection);
        let _commit = slot.commit.lock();
        let outcome = {
            let mut state = slot.state.write();
            let stored = state
                .records
                .get(id)
                .map(|r| (r.entity.version, r.provisional));
            match stored {
                Some((stored, false)) if stored > version => RemoveOutcome::Stale,
                Some(_) => {
                    let sequence = self.inner.next_sequence();
                    state.records.remove(id);
                    state.bury(id, version, sequence, self.inner.tombstone_limit);
                    slot.last_sequence.store(sequence, Ordering::SeqCst);
                    RemoveOutcome::Removed
                }
                None => {
                    let sequence = self.inner.sequence.load(Ordering::SeqCst);
                    state.bury(id, version, sequence, self.inner.tombstone_limit);
                    RemoveOutcome::Absent
                }
            }
        };
        if outcome == RemoveOutcome::Removed {
            self.inner.notify(collection);
        }
        outcome
    }

    /// Seeds a collection with cached entities.
    ///
    /// Cached entities are provisional: any later fetch or push result for
    /// the same id replaces them regardless of version. Ids that already
    /// hold authoritative state (or a tombstone) are left untouched.
    /// Returns the number of entities inserted.
    pub fn hydrate(&self, collection: CollectionType, entities: Vec<Entity>) -> usize {
        let slot = self.inner.slot(collection);
        let _commit = slot.commit.lock();
        let inserted = {
            let mut state = slot.state.write();
            let sequence = self.inner.next_sequence();
            let mut inserted = 0;
            for entity in entities {
                if state.records.contains_key(&entity.id) || state.tombstones.contains_key(&entity.id) {
                    continue;
                }
                state.records.insert(
                    entity.id.clone(),
                    Record {
                        entity,
                        provisional: true,
                        committed_at: sequence,
                    },
                );
                inserted += 1;
            }
            if inserted > 0 {
                slot.last_sequence.store(sequence, Ordering::SeqCst);
            }
            inserted
        };
        if inserted > 0 {
            self.inner.notify(collection);
        }
        inserted
    }

    /// Registers a callback for every committed change of a collection.
    ///
    /// The callback receives the current snapshot immediately, then the
    /// full snapshot after every commit. A panicking callback is isolated:
    /// it is logged and counted, and the remaining subscribers still run.
    pub fn subscribe<F>(&self, collection: CollectionType, callback: F) -> Subscription
    where
        F: Fn(Arc<Snapshot>) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        let callback: Callback = Arc::new(callback);

        let slot = self.inner.slot(collection);
        let _commit = slot.commit.lock();
        slot.subscribers.write().push(Subscriber {
            id,
            callback: Arc::clone(&callback),
        });
        self.inner
            .deliver(collection, id, &callback, self.inner.snapshot(collection));

        Subscription {
            collection,
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Returns the number of live subscribers of a collection.
    pub fn subscriber_count(&self, collection: CollectionType) -> usize {
        self.inner.slot(collection).subscribers.read().len()
    }

    /// Drops every subscriber of every collection; returns how many.
    pub fn clear_subscribers(&self) -> usize {
        CollectionType::ALL
            .into_iter()
            .map(|c| {
                let mut subscribers = self.inner.slot(c).subscribers.write();
                let count = subscribers.len();
                subscribers.clear();
                count
            })
            .sum()
    }

    /// Returns the number of subscriber callbacks that panicked.
    pub fn subscriber_failures(&self) -> u64 {
        self.inner.subscriber_failures.load(Ordering::SeqCst)
    }

    /// Returns a read-only handle.
    pub fn reader(&self) -> StoreReader {
        StoreReader {
            store: self.clone(),
        }
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("EntityStore");
        for collection in CollectionType::ALL {
            dbg.field(collection.as_str(), &self.len(collection));
        }
        dbg.field("sequence", &self.sequence()).finish()
    }
}

/// Read-only view of an [`EntityStore`] for UI surfaces.
#[derive(Clone, Debug)]
pub struct StoreReader {
    store: EntityStore,
}

impl StoreReader {
    /// Returns the latest known entity with the given id.
    pub fn get(&self, collection: CollectionType, id: &EntityId) -> Option<Entity> {
        self.store.get(collection, id)
    }

    /// Returns every entity of a collection, most recent version first.
    pub fn get_all(&self, collection: CollectionType) -> Vec<Entity> {
        self.store.get_all(collection)
    }

    /// Returns the current snapshot of a collection.
    pub fn snapshot(&self, collection: CollectionType) -> Arc<Snapshot> {
        self.store.snapshot(collection)
    }

    /// See [`EntityStore::subscribe`].
    pub fn subscribe<F>(&self, collection: CollectionType, callback: F) -> Subscription
    where
        F: Fn(Arc<Snapshot>) + Send + Sync + 'static,
    {
        self.store.subscribe(collection, callback)
    }
}

/// Handle to a registered subscriber.
///
/// Dropping the handle unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    collection: CollectionType,
    id: u64,
    store: Weak<StoreInner>,
}

impl Subscription {
    /// Returns the subscribed collection.
    pub fn collection(&self) -> CollectionType {
        self.collection
    }

    /// Returns true while the callback is registered.
    pub fn is_active(&self) -> bool {
        self.store.upgrade().is_some_and(|inner| {
            inner
                .slot(self.collection)
                .subscribers
                .read()
                .iter()
                .any(|s| s.id == self.id)
        })
    }

    /// Stops future notifications. Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.store.upgrade() {
            if inner.remove_subscriber(self.collection, self.id) {
                debug!(collection = %self.collection, subscriber = self.id, "unsubscribed");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("collection", &self.collection)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::mpsc;
    use std::time::Duration;

    const WALLETS: CollectionType = CollectionType::Wallets;

    fn wallet(id: &str, version: u64) -> Entity {
        Entity::new(id, version, json!({"balance": format!("{}.00", version)}))
    }

    fn versions_seen(store: &EntityStore, id: &'static str) -> (Subscription, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = store.subscribe(WALLETS, move |snapshot| {
            if let Some(e) = snapshot.get(&EntityId::new(id)) {
                sink.lock().push(e.version.get());
            }
        });
        (sub, seen)
    }

    #[test]
    fn apply_inserts_and_updates() {
        let store = EntityStore::new();
        assert_eq!(store.apply_with_outcome(WALLETS, wallet("a", 1)), ApplyOutcome::Inserted);
        assert_eq!(store.apply_with_outcome(WALLETS, wallet("a", 3)), ApplyOutcome::Updated);
        assert_eq!(store.get(WALLETS, &"a".into()).unwrap().version, Version::new(3));
        assert_eq!(store.len(WALLETS), 1);
    }

    #[test]
    fn stale_and_duplicate_are_dropped() {
        let store = EntityStore::new();
        store.apply(WALLETS, wallet("a", 5));
        let (_sub, seen) = versions_seen(&store, "a");

        assert_eq!(store.apply_with_outcome(WALLETS, wallet("a", 4)), ApplyOutcome::Stale);
        assert_eq!(store.apply_with_outcome(WALLETS, wallet("a", 5)), ApplyOutcome::Duplicate);

        // Only the initial delivery, no notifications for dropped writes.
        assert_eq!(*seen.lock(), vec![5]);
        assert_eq!(store.get(WALLETS, &"a".into()).unwrap().data, json!({"balance": "5.00"}));
    }

    #[test]
    fn get_all_orders_by_recency() {
        let store = EntityStore::new();
        store.apply(WALLETS, wallet("b", 2));
        store.apply(WALLETS, wallet("c", 9));
        store.apply(WALLETS, wallet("a", 2));

        let ids: Vec<_> = store
            .get_all(WALLETS)
            .into_iter()
            .map(|e| e.id.to_string())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn subscribers_receive_full_snapshots() {
        let store = EntityStore::new();
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sizes);
        let _sub = store.subscribe(WALLETS, move |snapshot| sink.lock().push(snapshot.len()));

        store.apply(WALLETS, wallet("a", 1));
        store.apply(WALLETS, wallet("b", 1));
        store.apply(CollectionType::Cards, wallet("x", 1));

        assert_eq!(*sizes.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let store = EntityStore::new();
        let _bad = store.subscribe(WALLETS, |snapshot| {
            if !snapshot.is_empty() {
                panic!("render failed");
            }
        });
        let received = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&received);
        let _good = store.subscribe(WALLETS, move |snapshot| *sink.lock() = snapshot.len());

        assert!(store.apply(WALLETS, wallet("a", 1)));

        assert_eq!(*received.lock(), 1);
        assert_eq!(store.subscriber_failures(), 1);
        assert_eq!(store.get(WALLETS, &"a".into()).unwrap().version, Version::new(1));
    }

    #[test]
    fn unsubscribe_is_idempotent_and_immediate() {
        let store = EntityStore::new();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let sub = store.subscribe(WALLETS, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(sub.is_active());

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(store.subscriber_count(WALLETS), 0);

        store.apply(WALLETS, wallet("a", 1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let store = EntityStore::new();
        {
            let _sub = store.subscribe(WALLETS, |_| {});
            assert_eq!(store.subscriber_count(WALLETS), 1);
        }
        assert_eq!(store.subscriber_count(WALLETS), 0);
    }

    #[test]
    fn callback_may_unsubscribe_other_handles() {
        let store = EntityStore::new();
        let holder: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&holder);
        let _first = store.subscribe(WALLETS, move |snapshot| {
            if !snapshot.is_empty() {
                slot.lock().take();
            }
        });
        *holder.lock() = Some(store.subscribe(WALLETS, |_| {}));
        assert_eq!(store.subscriber_count(WALLETS), 2);

        store.apply(WALLETS, wallet("a", 1));
        assert_eq!(store.subscriber_count(WALLETS), 1);
    }

    #[test]
    fn removal_leaves_tombstone() {
        let store = EntityStore::new();
        store.apply(WALLETS, wallet("a", 4));
        assert!(store.remove(WALLETS, &"a".into()));
        assert!(!store.remove(WALLETS, &"a".into()));

        assert!(!store.apply(WALLETS, wallet("a", 4)));
        assert!(!store.apply(WALLETS, wallet("a", 2)));
        assert!(store.get(WALLETS, &"a".into()).is_none());

        assert!(store.apply(WALLETS, wallet("a", 5)));
    }

    #[test]
    fn versioned_removal() {
        let store = EntityStore::new();
        store.apply(WALLETS, wallet("a", 7));
        assert_eq!(store.remove_versioned(WALLETS, &"a".into(), Version::new(6)), RemoveOutcome::Stale);
        assert!(store.get(WALLETS, &"a".into()).is_some());

        assert_eq!(store.remove_versioned(WALLETS, &"a".into(), Version::new(8)), RemoveOutcome::Removed);
        assert!(!store.apply(WALLETS, wallet("a", 8)));

        // Deletion that overtakes the creation.
        assert_eq!(store.remove_versioned(WALLETS, &"b".into(), Version::new(3)), RemoveOutcome::Absent);
        assert!(!store.apply(WALLETS, wallet("b", 2)));
        assert!(store.apply(WALLETS, wallet("b", 4)));
    }

    #[test]
    fn hydrated_entities_are_provisional() {
        let store = EntityStore::new();
        assert_eq!(store.hydrate(WALLETS, vec![wallet("a", 50), wallet("b", 1)]), 2);
        assert!(store.is_provisional(WALLETS, &"a".into()));

        // Fetch/push supersede the cache even with a lower version.
        assert_eq!(store.apply_with_outcome(WALLETS, wallet("a", 3)), ApplyOutcome::Updated);
        assert!(!store.is_provisional(WALLETS, &"a".into()));
        assert_eq!(store.get(WALLETS, &"a".into()).unwrap().version, Version::new(3));

        // Hydration never overwrites authoritative state.
        assert_eq!(store.hydrate(WALLETS, vec![wallet("a", 99)]), 0);
        assert_eq!(store.get(WALLETS, &"a".into()).unwrap().version, Version::new(3));
    }

    #[test]
    fn exhaustive_removes_only_older_records() {
        let store = EntityStore::new();
        store.apply(WALLETS, wallet("a", 1));
        store.apply(WALLETS, wallet("b", 1));
        let issued_at = store.sequence();
        // Arrives via push after the fetch was issued.
        store.apply(WALLETS, wallet("c", 1));

        let (outcomes, removed) = store.apply_exhaustive(WALLETS, vec![wallet("a", 2)], issued_at);
        assert_eq!(outcomes, vec![ApplyOutcome::Updated]);
        assert_eq!(removed, 1);
        assert!(store.get(WALLETS, &"b".into()).is_none());
        assert!(store.get(WALLETS, &"c".into()).is_some());
    }

    #[test]
    fn batch_notifies_once() {
        let store = EntityStore::new();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let _sub = store.subscribe(WALLETS, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let outcomes = store.apply_batch(WALLETS, vec![wallet("a", 1), wallet("b", 1), wallet("a", 0)]);
        assert_eq!(
            outcomes,
            vec![ApplyOutcome::Inserted, ApplyOutcome::Inserted, ApplyOutcome::Stale]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_subscribers_counts_all() {
        let store = EntityStore::new();
        let _a = store.subscribe(WALLETS, |_| {});
        let _b = store.subscribe(CollectionType::Cards, |_| {});
        assert_eq!(store.clear_subscribers(), 2);
        assert_eq!(store.subscriber_count(WALLETS), 0);
    }

    #[test]
    fn callback_may_subscribe_to_its_own_collection() {
        let store = EntityStore::new();
        let children: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));
        let child_sizes = Arc::new(Mutex::new(Vec::new()));

        let parent = {
            let store = store.clone();
            let children = Arc::clone(&children);
            let child_sizes = Arc::clone(&child_sizes);
            store.clone().subscribe(WALLETS, move |snapshot| {
                if snapshot.is_empty() || !children.lock().is_empty() {
                    return;
                }
                let sizes = Arc::clone(&child_sizes);
                let child = store.subscribe(WALLETS, move |snapshot| sizes.lock().push(snapshot.len()));
                children.lock().push(child);
            })
        };

        let (done_tx, done_rx) = mpsc::channel();
        let writer = store.clone();
        std::thread::spawn(move || {
            writer.apply(WALLETS, wallet("a", 1));
            writer.apply(WALLETS, wallet("b", 1));
            let _ = done_tx.send(());
        });
        done_rx
            .recv_timeout(Duration::from_secs(3))
            .expect("apply blocked by a subscription made inside a callback");

        // The child sees the snapshot current at mount time, then later commits.
        assert_eq!(*child_sizes.lock(), vec![1, 2]);
        assert_eq!(store.subscriber_count(WALLETS), 2);
        drop(parent);
    }

    #[test]
    fn write_inside_callback_never_reorders_snapshots() {
        let store = EntityStore::new();
        let writer = store.clone();
        let _first = store.subscribe(WALLETS, move |snapshot| {
            if snapshot.get(&"a".into()).map(|e| e.version.get()) == Some(1) {
                writer.apply(WALLETS, wallet("a", 2));
            }
        });
        let (_second, seen) = versions_seen(&store, "a");

        store.apply(WALLETS, wallet("a", 1));
        assert_eq!(*seen.lock(), vec![2]);
        assert_eq!(store.get(WALLETS, &"a".into()).unwrap().version, Version::new(2));
    }

    #[test]
    fn tombstones_are_capped_oldest_first() {
        let store = EntityStore::with_tombstone_limit(3);
        for i in 0..5 {
            let id = EntityId::new(format!("ghost-{}", i));
            assert_eq!(store.remove_versioned(WALLETS, &id, Version::new(10)), RemoveOutcome::Absent);
        }
        assert_eq!(store.tombstone_count(WALLETS), 3);

        // The two oldest were evicted; the newest still block stale upserts.
        assert!(store.apply(WALLETS, wallet("ghost-0", 1)));
        assert!(!store.apply(WALLETS, wallet("ghost-4", 1)));
    }

    #[test]
    fn churn_keeps_tombstones_bounded() {
        let store = EntityStore::with_tombstone_limit(100);
        for i in 0..1_000 {
            let id = format!("n-{}", i);
            store.apply(WALLETS, wallet(&id, 1));
            store.remove_versioned(WALLETS, &EntityId::new(id), Version::new(2));
            store.remove_versioned(WALLETS, &EntityId::new(format!("ghost-{}", i)), Version::new(1));
        }
        assert_eq!(store.len(WALLETS), 0);
        assert_eq!(store.tombstone_count(WALLETS), 100);
    }

    #[test]
    fn exhaustive_fetch_confirms_tombstones() {
        let store = EntityStore::new();
        store.apply(WALLETS, wallet("a", 3));
        store.remove_versioned(WALLETS, &"a".into(), Version::new(4));
        store.remove_versioned(WALLETS, &"ghost".into(), Version::new(1));
        assert_eq!(store.tombstone_count(WALLETS), 2);

        // Issued before the deletions were recorded: proves nothing.
        store.apply_exhaustive(WALLETS, vec![], 0);
        assert_eq!(store.tombstone_count(WALLETS), 2);

        store.apply(WALLETS, wallet("b", 1));
        let issued_at = store.sequence();
        let (_, removed) = store.apply_exhaustive(WALLETS, vec![wallet("b", 1)], issued_at);
        assert_eq!(removed, 0);
        assert_eq!(store.tombstone_count(WALLETS), 0);
    }
}
