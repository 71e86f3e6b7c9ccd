//! Entities and their identity/version metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Stable identifier of an entity, unique within its collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Backend-assigned ordering marker for representations of one entity.
///
/// Versions are monotonically non-decreasing per entity and are the sole
/// tie-breaker between conflicting updates; arrival order never is.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// The lowest possible version.
    pub const ZERO: Version = Version(0);

    /// Creates a version.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// One versioned record (wallet, card, transaction or notification).
///
/// `data` holds the domain fields exactly as the backend asserted them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity ID.
    pub id: EntityId,
    /// Backend version of this representation.
    pub version: Version,
    /// Opaque domain fields.
    #[serde(default)]
    pub data: Value,
}

impl Entity {
    /// Creates an entity.
    pub fn new(id: impl Into<EntityId>, version: impl Into<Version>, data: Value) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            data,
        }
    }

    /// Returns true if this representation is strictly newer than `version`.
    pub fn is_newer_than(&self, version: Version) -> bool {
        self.version > version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_json_shape() {
        let entity = Entity::new("card-1", 7, json!({"status": "frozen"}));
        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(
            value,
            json!({"id": "card-1", "version": 7, "data": {"status": "frozen"}})
        );
    }

    #[test]
    fn missing_data_defaults_to_null() {
        let entity: Entity = serde_json::from_str(r#"{"id":"w","version":1}"#).unwrap();
        assert_eq!(entity.data, Value::Null);
        assert_eq!(entity.version, Version::new(1));
    }

    #[test]
    fn version_ordering() {
        let entity = Entity::new("n-1", 5, Value::Null);
        assert!(entity.is_newer_than(Version::new(4)));
        assert!(!entity.is_newer_than(Version::new(5)));
        assert!(Version::ZERO < Version::new(1));
    }
}
