//! Property-based test generators using proptest.
//!
//! Provides strategies for generating entities, push events and apply
//! sequences that exercise the monotonic-version rule.

use finsync_model::{CollectionType, Entity, EntityId, PushEvent, Version};
use proptest::prelude::*;
use serde_json::json;

/// Strategy for generating collection types.
pub fn collection_strategy() -> impl Strategy<Value = CollectionType> {
    prop::sample::select(CollectionType::ALL.to_vec())
}

/// Strategy for generating entity IDs from a small pool, so sequences
/// revisit the same entities.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    (0u8..8).prop_map(|n| EntityId::new(format!("e-{}", n)))
}

/// Strategy for generating versions.
pub fn version_strategy() -> impl Strategy<Value = Version> {
    (0u64..64).prop_map(Version::new)
}

/// Strategy for generating entities whose payload records their version.
pub fn entity_strategy() -> impl Strategy<Value = Entity> {
    (entity_id_strategy(), version_strategy()).prop_map(|(id, version)| {
        Entity::new(id, version, json!({"written_at": version.get()}))
    })
}

/// Strategy for generating a sequence of entities to apply in order.
pub fn apply_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<Entity>> {
    prop::collection::vec(entity_strategy(), 1..max_len.max(2))
}

/// Strategy for generating push events: mostly upserts, some deletions.
pub fn push_event_strategy() -> impl Strategy<Value = PushEvent> {
    prop_oneof![
        4 => (collection_strategy(), entity_strategy())
            .prop_map(|(collection, entity)| PushEvent::upsert(collection, entity)),
        1 => (collection_strategy(), entity_id_strategy(), version_strategy())
            .prop_map(|(collection, id, version)| PushEvent::delete(collection, id, version)),
    ]
}
