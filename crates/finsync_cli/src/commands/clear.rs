//! Clear command implementation.

use super::CliResult;
use finsync_model::CollectionType;
use finsync_storage::{CacheStore, FileCache};
use std::io::Write;
use tracing::info;

/// Runs the clear command for one collection, or all of them.
pub async fn run(
    cache: &FileCache,
    collection: Option<CollectionType>,
    out: &mut impl Write,
) -> CliResult<()> {
    let targets = match collection {
        Some(c) => vec![c],
        None => CollectionType::ALL.to_vec(),
    };

    for collection in targets {
        let existed = cache.path_for(collection).exists();
        cache.clear(collection).await?;
        if existed {
            info!(%collection, "snapshot cleared");
            writeln!(out, "cleared {}", collection)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsync_model::Entity;
    use serde_json::Value;

    async fn seeded() -> (tempfile::TempDir, FileCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        for collection in [CollectionType::Wallets, CollectionType::Cards] {
            cache
                .save(collection, &[Entity::new("x", 1, Value::Null)])
                .await
                .unwrap();
        }
        (dir, cache)
    }

    #[tokio::test]
    async fn clears_one_collection() {
        let (_dir, cache) = seeded().await;
        let mut out = Vec::new();
        run(&cache, Some(CollectionType::Cards), &mut out).await.unwrap();

        assert!(cache.load(CollectionType::Cards).await.unwrap().is_empty());
        assert_eq!(cache.load(CollectionType::Wallets).await.unwrap().len(), 1);
        assert_eq!(String::from_utf8(out).unwrap(), "cleared cards\n");
    }

    #[tokio::test]
    async fn clears_everything() {
        let (_dir, cache) = seeded().await;
        let mut out = Vec::new();
        run(&cache, None, &mut out).await.unwrap();

        for collection in CollectionType::ALL {
            assert!(!cache.path_for(collection).exists());
        }
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 2);
    }
}
