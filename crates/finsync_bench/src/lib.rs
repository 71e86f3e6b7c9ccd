//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use finsync_model::Entity;
use rand::Rng;
use serde_json::json;

/// Generates `count` wallet-shaped entities with ids `e-0..` at `version`.
pub fn generate_entities(count: usize, version: u64) -> Vec<Entity> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            let cents: u64 = rng.gen_range(0..10_000_000);
            Entity::new(
                format!("e-{}", i),
                version,
                json!({
                    "balance": format!("{}.{:02}", cents / 100, cents % 100),
                    "currency": "USD",
                }),
            )
        })
        .collect()
}

/// Generates a shuffled sequence of versions `1..=count` for one id.
pub fn shuffled_versions(count: u64) -> Vec<u64> {
    use rand::seq::SliceRandom;
    let mut versions: Vec<u64> = (1..=count).collect();
    versions.shuffle(&mut rand::thread_rng());
    versions
}
