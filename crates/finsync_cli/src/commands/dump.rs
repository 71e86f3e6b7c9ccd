//! Dump command implementation.

use super::CliResult;
use finsync_model::CollectionType;
use finsync_storage::{CacheStore, FileCache};
use std::io::Write;
use tracing::debug;

/// Runs the dump command, printing one JSON entity per line.
///
/// Returns the number of entities printed.
pub async fn run(
    cache: &FileCache,
    collection: CollectionType,
    limit: Option<usize>,
    out: &mut impl Write,
) -> CliResult<usize> {
    let entities = cache.load(collection).await?;
    let total = entities.len();
    let max = limit.unwrap_or(usize::MAX);

    let mut printed = 0;
    for entity in entities.iter().take(max) {
        writeln!(out, "{}", serde_json::to_string(entity)?)?;
        printed += 1;
    }

    debug!(%collection, printed, total, "dumped snapshot");
    Ok(printed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsync_model::Entity;
    use serde_json::json;

    #[tokio::test]
    async fn prints_json_lines_up_to_limit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let wallets: Vec<Entity> = (1..=3u64)
            .map(|i| Entity::new(format!("w-{}", i), i, json!({"balance": i * 10})))
            .collect();
        cache.save(CollectionType::Wallets, &wallets).await.unwrap();

        let mut out = Vec::new();
        let printed = run(&cache, CollectionType::Wallets, Some(2), &mut out).await.unwrap();
        assert_eq!(printed, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<Entity> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines, wallets[..2].to_vec());
    }

    #[tokio::test]
    async fn missing_snapshot_prints_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();

        let mut out = Vec::new();
        assert_eq!(run(&cache, CollectionType::Cards, None, &mut out).await.unwrap(), 0);
        assert!(out.is_empty());
    }
}
