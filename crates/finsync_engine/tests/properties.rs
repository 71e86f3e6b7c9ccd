//! Property tests for the monotonic-version rule.

use finsync_engine::{EntityStore, Reconciler};
use finsync_model::{Change, CollectionType, EntityId};
use finsync_testkit::{apply_sequence_strategy, push_event_strategy};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

const WALLETS: CollectionType = CollectionType::Wallets;

proptest! {
    #[test]
    fn stored_version_is_the_maximum_applied(sequence in apply_sequence_strategy(48)) {
        let store = EntityStore::new();
        let mut expected: HashMap<EntityId, u64> = HashMap::new();

        for entity in sequence {
            let max = expected.entry(entity.id.clone()).or_insert(entity.version.get());
            *max = (*max).max(entity.version.get());
            store.apply(WALLETS, entity);
        }

        prop_assert_eq!(store.len(WALLETS), expected.len());
        for (id, version) in &expected {
            let stored = store.get(WALLETS, id).map(|e| e.version.get());
            prop_assert_eq!(stored, Some(*version));
            // Payloads always come from the winning representation.
            let written_at = store.get(WALLETS, id).and_then(|e| e.data["written_at"].as_u64());
            prop_assert_eq!(written_at, Some(*version));
        }
    }

    #[test]
    fn deltas_converge_regardless_of_arrival_order(
        events in prop::collection::vec(push_event_strategy(), 1..64)
    ) {
        let reconciler = Reconciler::new(EntityStore::new());
        let mut upserts: HashMap<(CollectionType, EntityId), u64> = HashMap::new();
        let mut deletes: HashMap<(CollectionType, EntityId), u64> = HashMap::new();

        for event in events {
            let key = (event.collection, event.change.id().clone());
            let version = event.change.version().get();
            let seen = match &event.change {
                Change::Upsert { .. } => &mut upserts,
                Change::Delete { .. } => &mut deletes,
            };
            let max = seen.entry(key).or_insert(version);
            *max = (*max).max(version);
            reconciler.apply_delta(event);
        }

        let store = reconciler.store();
        for ((collection, id), upserted) in &upserts {
            let deleted = deletes.get(&(*collection, id.clone())).copied();
            let expected = match deleted {
                // A deletion wins ties.
                Some(deleted) if deleted >= *upserted => None,
                _ => Some(*upserted),
            };
            let stored = store.get(*collection, id).map(|e| e.version.get());
            prop_assert_eq!(stored, expected, "{} in {}", id, collection);
        }
        for (collection, id) in deletes.keys() {
            if !upserts.contains_key(&(*collection, id.clone())) {
                prop_assert!(store.get(*collection, id).is_none());
            }
        }
    }

    #[test]
    fn subscribers_never_observe_a_version_decrease(
        events in prop::collection::vec(push_event_strategy(), 1..64)
    ) {
        let reconciler = Reconciler::new(EntityStore::new());
        let regressions = Arc::new(Mutex::new(Vec::new()));
        let mut subscriptions = Vec::new();

        for collection in CollectionType::ALL {
            let highest: Mutex<HashMap<EntityId, u64>> = Mutex::new(HashMap::new());
            let regressions = Arc::clone(&regressions);
            subscriptions.push(reconciler.store().subscribe(collection, move |snapshot| {
                let mut highest = highest.lock();
                for entity in &snapshot.entities {
                    let version = entity.version.get();
                    let seen = highest.entry(entity.id.clone()).or_insert(version);
                    if version < *seen {
                        regressions.lock().push((collection, entity.id.clone(), *seen, version));
                    }
                    *seen = (*seen).max(version);
                }
            }));
        }

        for event in events {
            reconciler.apply_delta(event);
        }

        let regressions = regressions.lock();
        prop_assert!(regressions.is_empty(), "regressions: {:?}", *regressions);
        drop(subscriptions);
    }
}
