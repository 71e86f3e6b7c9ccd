//! File-based cache adapter.

use crate::cache::CacheStore;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use finsync_model::{CollectionType, Entity, Version};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// Schema version written into every snapshot file.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// On-disk snapshot layout.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    schema: u32,
    collection: CollectionType,
    saved_at_ms: u64,
    entities: Vec<Entity>,
}

/// Summary of a snapshot file, used by inspection tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Collection the snapshot belongs to.
    pub collection: CollectionType,
    /// Wall-clock save time in milliseconds since the Unix epoch.
    pub saved_at_ms: u64,
    /// Number of entities.
    pub entity_count: usize,
    /// Lowest and highest version in the snapshot, if not empty.
    pub version_range: Option<(Version, Version)>,
    /// File size in bytes.
    pub file_size: u64,
}

/// A directory-backed cache adapter.
///
/// Each collection is stored in `<dir>/<collection>.cbor` as a CBOR
/// envelope tagged with [`CACHE_SCHEMA_VERSION`].
///
/// # Durability
///
/// Saves write a sibling temp file and rename it over the snapshot, so a
/// crash mid-write leaves the previous snapshot intact.
///
/// # Example
///
/// ```no_run
/// use finsync_storage::FileCache;
/// use std::path::Path;
///
/// let cache = FileCache::open(Path::new("/var/lib/app/finsync")).unwrap();
/// assert!(cache.dir().ends_with("finsync"));
/// ```
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Opens a cache directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: &Path) -> CacheResult<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the snapshot path of a collection.
    #[must_use]
    pub fn path_for(&self, collection: CollectionType) -> PathBuf {
        self.dir.join(format!("{}.cbor", collection))
    }

    /// Summarizes the snapshot of a collection without keeping its entities.
    ///
    /// Returns `None` if no snapshot exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot exists but cannot be decoded.
    pub async fn inspect(&self, collection: CollectionType) -> CacheResult<Option<SnapshotInfo>> {
        let path = self.path_for(collection);
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };
        let envelope = decode(&bytes, collection)?;

        let version_range = envelope
            .entities
            .iter()
            .map(|e| e.version)
            .fold(None, |range: Option<(Version, Version)>, v| match range {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            });

        Ok(Some(SnapshotInfo {
            collection,
            saved_at_ms: envelope.saved_at_ms,
            entity_count: envelope.entities.len(),
            version_range,
            file_size: bytes.len() as u64,
        }))
    }
}

async fn read_optional(path: &Path) -> CacheResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn decode(bytes: &[u8], collection: CollectionType) -> CacheResult<Envelope> {
    let envelope: Envelope =
        ciborium::from_reader(bytes).map_err(|e| CacheError::Corrupted(e.to_string()))?;

    if envelope.schema != CACHE_SCHEMA_VERSION {
        return Err(CacheError::SchemaMismatch {
            found: envelope.schema,
            expected: CACHE_SCHEMA_VERSION,
        });
    }
    if envelope.collection != collection {
        return Err(CacheError::Corrupted(format!(
            "snapshot holds {} but was read as {}",
            envelope.collection, collection
        )));
    }
    Ok(envelope)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[async_trait]
impl CacheStore for FileCache {
    async fn load(&self, collection: CollectionType) -> CacheResult<Vec<Entity>> {
        let path = self.path_for(collection);
        match read_optional(&path).await? {
            Some(bytes) => {
                let envelope = decode(&bytes, collection)?;
                debug!(%collection, count = envelope.entities.len(), "loaded cache snapshot");
                Ok(envelope.entities)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, collection: CollectionType, entities: &[Entity]) -> CacheResult<()> {
        let envelope = Envelope {
            schema: CACHE_SCHEMA_VERSION,
            collection,
            saved_at_ms: now_ms(),
            entities: entities.to_vec(),
        };

        let mut bytes = Vec::new();
        ciborium::into_writer(&envelope, &mut bytes)
            .map_err(|e| CacheError::Corrupted(e.to_string()))?;

        let path = self.path_for(collection);
        let tmp = path.with_extension("cbor.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        trace!(%collection, bytes = bytes.len(), "saved cache snapshot");
        Ok(())
    }

    async fn clear(&self, collection: CollectionType) -> CacheResult<()> {
        match tokio::fs::remove_file(self.path_for(collection)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn card(id: &str, version: u64) -> Entity {
        Entity::new(id, version, json!({"status": "active", "limit": 1500, "tags": ["virtual"]}))
    }

    #[tokio::test]
    async fn missing_snapshot_is_empty() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        assert!(cache.load(CollectionType::Cards).await.unwrap().is_empty());
        assert!(cache.inspect(CollectionType::Cards).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let cards = vec![card("c-1", 3), card("c-2", 8)];
        {
            let cache = FileCache::open(dir.path()).unwrap();
            cache.save(CollectionType::Cards, &cards).await.unwrap();
        }

        let cache = FileCache::open(dir.path()).unwrap();
        assert_eq!(cache.load(CollectionType::Cards).await.unwrap(), cards);
        assert!(!cache.path_for(CollectionType::Cards).with_extension("cbor.tmp").exists());

        let info = cache.inspect(CollectionType::Cards).await.unwrap().unwrap();
        assert_eq!(info.entity_count, 2);
        assert_eq!(info.version_range, Some((Version::new(3), Version::new(8))));
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        std::fs::write(cache.path_for(CollectionType::Wallets), b"not cbor at all").unwrap();

        assert!(matches!(
            cache.load(CollectionType::Wallets).await,
            Err(CacheError::Corrupted(_))
        ));
    }

    #[tokio::test]
    async fn schema_mismatch_is_detected() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let envelope = Envelope {
            schema: CACHE_SCHEMA_VERSION + 1,
            collection: CollectionType::Wallets,
            saved_at_ms: 0,
            entities: Vec::new(),
        };
        let mut bytes = Vec::new();
        ciborium::into_writer(&envelope, &mut bytes).unwrap();
        std::fs::write(cache.path_for(CollectionType::Wallets), bytes).unwrap();

        assert!(matches!(
            cache.load(CollectionType::Wallets).await,
            Err(CacheError::SchemaMismatch { found, expected })
                if found == CACHE_SCHEMA_VERSION + 1 && expected == CACHE_SCHEMA_VERSION
        ));
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        cache.save(CollectionType::Notifications, &[card("n", 1)]).await.unwrap();
        cache.clear(CollectionType::Notifications).await.unwrap();
        cache.clear(CollectionType::Notifications).await.unwrap();
        assert!(cache.load(CollectionType::Notifications).await.unwrap().is_empty());
    }
}
