//! Cache store trait definition.

use crate::error::CacheResult;
use async_trait::async_trait;
use finsync_model::{CollectionType, Entity};
use std::sync::Arc;

/// Durable key/value persistence of collection snapshots.
///
/// Adapters may be backed by synchronous or asynchronous storage; callers
/// always treat them as async.
///
/// # Invariants
///
/// - `load` returns exactly the entities of the last successful `save` for
///   that collection, or an empty list if there is none
/// - `save` replaces the whole snapshot; there is no merge
/// - A failed `save` leaves the previous snapshot readable
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Loads the last saved snapshot of a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot exists but cannot be read.
    async fn load(&self, collection: CollectionType) -> CacheResult<Vec<Entity>>;

    /// Replaces the saved snapshot of a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    async fn save(&self, collection: CollectionType, entities: &[Entity]) -> CacheResult<()>;

    /// Removes the saved snapshot of a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot exists but cannot be removed.
    async fn clear(&self, collection: CollectionType) -> CacheResult<()>;
}

#[async_trait]
impl<T: CacheStore + ?Sized> CacheStore for Arc<T> {
    async fn load(&self, collection: CollectionType) -> CacheResult<Vec<Entity>> {
        (**self).load(collection).await
    }

    async fn save(&self, collection: CollectionType, entities: &[Entity]) -> CacheResult<()> {
        (**self).save(collection, entities).await
    }

    async fn clear(&self, collection: CollectionType) -> CacheResult<()> {
        (**self).clear(collection).await
    }
}
