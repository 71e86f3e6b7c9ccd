//! Collection types.

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The category of an entity.
///
/// Each collection type maps to one keyed collection in the entity store,
/// one cache slot and one push subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionType {
    /// Wallets and their balances.
    Wallets,
    /// Payment cards, their balances and status.
    Cards,
    /// Transaction history entries.
    Transactions,
    /// User notifications and their read flags.
    Notifications,
}

impl CollectionType {
    /// Every collection type, in a stable order.
    pub const ALL: [CollectionType; 4] = [
        CollectionType::Wallets,
        CollectionType::Cards,
        CollectionType::Transactions,
        CollectionType::Notifications,
    ];

    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionType::Wallets => "wallets",
            CollectionType::Cards => "cards",
            CollectionType::Transactions => "transactions",
            CollectionType::Notifications => "notifications",
        }
    }
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionType {
    type Err = ModelError;

    fn from_str(s: &str) -> ModelResult<Self> {
        CollectionType::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ModelError::UnknownCollection(s.to_string()))
    }
}
