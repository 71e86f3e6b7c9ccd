//! In-memory cache adapter.

use crate::cache::CacheStore;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use finsync_model::{CollectionType, Entity};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// An in-memory cache adapter.
///
/// This adapter keeps snapshots in a map and is suitable for:
/// - Unit and integration tests
/// - Sessions that must not persist anything to the device
///
/// Loads and saves can be made to fail on demand to exercise the
/// `CacheUnavailable` paths of the engine.
#[derive(Debug, Default)]
pub struct MemoryCache {
    snapshots: RwLock<HashMap<CollectionType, Vec<Entity>>>,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
    saves: AtomicU64,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a snapshot, as if saved by a previous session.
    #[must_use]
    pub fn with_snapshot(self, collection: CollectionType, entities: Vec<Entity>) -> Self {
        self.snapshots.write().insert(collection, entities);
        self
    }

    /// Returns a copy of the saved snapshot of a collection.
    pub fn snapshot(&self, collection: CollectionType) -> Option<Vec<Entity>> {
        self.snapshots.read().get(&collection).cloned()
    }

    /// Makes every subsequent `load` fail (or succeed again).
    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent `save` fail (or succeed again).
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of successful saves.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn load(&self, collection: CollectionType) -> CacheResult<Vec<Entity>> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("injected load failure".into()));
        }
        Ok(self
            .snapshots
            .read()
            .get(&collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, collection: CollectionType, entities: &[Entity]) -> CacheResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("injected save failure".into()));
        }
        self.snapshots.write().insert(collection, entities.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self, collection: CollectionType) -> CacheResult<()> {
        self.snapshots.write().remove(&collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wallet(id: &str, version: u64) -> Entity {
        Entity::new(id, version, json!({"balance": "1.00"}))
    }

    #[tokio::test]
    async fn empty_load() {
        let cache = MemoryCache::new();
        assert!(cache.load(CollectionType::Cards).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_replaces_snapshot() {
        let cache = MemoryCache::new();
        cache
            .save(CollectionType::Wallets, &[wallet("a", 1), wallet("b", 1)])
            .await
            .unwrap();
        cache
            .save(CollectionType::Wallets, &[wallet("c", 2)])
            .await
            .unwrap();

        let loaded = cache.load(CollectionType::Wallets).await.unwrap();
        assert_eq!(loaded, vec![wallet("c", 2)]);
        assert_eq!(cache.save_count(), 2);
    }

    #[tokio::test]
    async fn injected_failures() {
        let cache = MemoryCache::new().with_snapshot(CollectionType::Wallets, vec![wallet("a", 1)]);

        cache.fail_loads(true);
        assert!(matches!(
            cache.load(CollectionType::Wallets).await,
            Err(CacheError::Unavailable(_))
        ));

        cache.fail_saves(true);
        assert!(cache.save(CollectionType::Wallets, &[]).await.is_err());

        cache.fail_loads(false);
        assert_eq!(cache.load(CollectionType::Wallets).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clear_removes_snapshot() {
        let cache = MemoryCache::new().with_snapshot(CollectionType::Cards, vec![wallet("c", 1)]);
        cache.clear(CollectionType::Cards).await.unwrap();
        assert!(cache.snapshot(CollectionType::Cards).is_none());
    }
}
