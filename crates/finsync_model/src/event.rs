//! Live deltas delivered by the push channel.

use crate::collection::CollectionType;
use crate::entity::{Entity, EntityId, Version};
use serde::{Deserialize, Serialize};

/// What happened to one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    /// Entity was created or updated.
    Upsert {
        /// The new representation.
        entity: Entity,
    },
    /// Entity was deleted or expired.
    Delete {
        /// ID of the removed entity.
        id: EntityId,
        /// Version at which the backend removed it.
        version: Version,
    },
}

impl Change {
    /// Returns the affected entity ID.
    pub fn id(&self) -> &EntityId {
        match self {
            Change::Upsert { entity } => &entity.id,
            Change::Delete { id, .. } => id,
        }
    }

    /// Returns the version carried by the change.
    pub fn version(&self) -> Version {
        match self {
            Change::Upsert { entity } => entity.version,
            Change::Delete { version, .. } => *version,
        }
    }

    /// Returns true if this is a deletion marker.
    pub fn is_delete(&self) -> bool {
        matches!(self, Change::Delete { .. })
    }
}

/// A single delta for one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    /// Affected collection.
    pub collection: CollectionType,
    /// The change itself.
    #[serde(flatten)]
    pub change: Change,
}

impl PushEvent {
    /// Creates an upsert event.
    pub fn upsert(collection: CollectionType, entity: Entity) -> Self {
        Self {
            collection,
            change: Change::Upsert { entity },
        }
    }

    /// Creates a deletion event.
    pub fn delete(
        collection: CollectionType,
        id: impl Into<EntityId>,
        version: impl Into<Version>,
    ) -> Self {
        Self {
            collection,
            change: Change::Delete {
                id: id.into(),
                version: version.into(),
            },
        }
    }
}
