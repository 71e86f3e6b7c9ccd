//! Merges bulk fetch results and push deltas into the store.
//!
//! Both sources go through the same monotonic-version rule, so the order in
//! which a fetch response and a push event for the same entity arrive does
//! not matter: the higher version wins.

use crate::gateway::FetchResponse;
use crate::store::{ApplyOutcome, EntityStore, RemoveOutcome};
use finsync_model::{Change, CollectionType, PushEvent};
use tracing::{debug, trace};

/// Counts of what one reconciliation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entities inserted or updated.
    pub applied: usize,
    /// Representations dropped because a newer version is stored.
    pub stale: usize,
    /// Representations identical in version to what is stored.
    pub duplicates: usize,
    /// Entities removed.
    pub removed: usize,
}

impl ReconcileReport {
    /// Returns true if the store changed.
    pub fn changed(&self) -> bool {
        self.applied > 0 || self.removed > 0
    }

    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Inserted | ApplyOutcome::Updated => self.applied += 1,
            ApplyOutcome::Stale => self.stale += 1,
            ApplyOutcome::Duplicate => self.duplicates += 1,
        }
    }
}

impl std::ops::AddAssign for ReconcileReport {
    fn add_assign(&mut self, other: Self) {
        self.applied += other.applied;
        self.stale += other.stale;
        self.duplicates += other.duplicates;
        self.removed += other.removed;
    }
}

/// The only writer of the [`EntityStore`].
#[derive(Debug, Clone)]
pub struct Reconciler {
    store: EntityStore,
}

impl Reconciler {
    /// Creates a reconciler writing to `store`.
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }

    /// Returns the store being written.
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Merges a bulk fetch result.
    ///
    /// `issued_at` is the store sequence captured when the fetch was
    /// issued. For an exhaustive response, entities missing from the result
    /// are removed unless they were written after the fetch was issued.
    pub fn apply_bulk(
        &self,
        collection: CollectionType,
        response: FetchResponse,
        issued_at: u64,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let count = response.entities.len();

        let outcomes = if response.exhaustive {
            let (outcomes, removed) = self.store.apply_exhaustive(collection, response.entities, issued_at);
            report.removed = removed;
            outcomes
        } else {
            self.store.apply_batch(collection, response.entities)
        };
        for outcome in outcomes {
            report.record(outcome);
        }

        debug!(
            %collection,
            count,
            exhaustive = response.exhaustive,
            applied = report.applied,
            stale = report.stale,
            removed = report.removed,
            "bulk result reconciled"
        );
        report
    }

    /// Merges one push delta.
    pub fn apply_delta(&self, event: PushEvent) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let collection = event.collection;

        match event.change {
            Change::Upsert { entity } => {
                report.record(self.store.apply_with_outcome(collection, entity));
            }
            Change::Delete { id, version } => {
                match self.store.remove_versioned(collection, &id, version) {
                    RemoveOutcome::Removed => report.removed += 1,
                    RemoveOutcome::Stale => {
                        debug!(%collection, %id, %version, "stale deletion ignored");
                        report.stale += 1;
                    }
                    RemoveOutcome::Absent => trace!(%collection, %id, "deletion of unknown entity"),
                }
            }
        }
        report
    }
}
