//! Frames exchanged over the push channel.

use crate::collection::CollectionType;
use crate::entity::{Entity, EntityId, Version};
use crate::event::{Change, PushEvent};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Session credential presented during the channel handshake.
///
/// The token is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Bearer token issued by the session layer.
    pub token: String,
}

impl Credentials {
    /// Creates credentials from a session token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Frames sent by the client.
///
/// `Debug` never prints the authentication token.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Authenticates the connection with the session credential.
    Authenticate {
        /// Session token.
        token: String,
    },
    /// Requests live deltas for one collection.
    Subscribe {
        /// Collection to subscribe to.
        collection: CollectionType,
    },
}

impl OutboundFrame {
    /// Returns a short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Authenticate { .. } => "authenticate",
            OutboundFrame::Subscribe { .. } => "subscribe",
        }
    }
}

impl fmt::Debug for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundFrame::Authenticate { .. } => f
                .debug_struct("Authenticate")
                .field("token", &"<redacted>")
                .finish(),
            OutboundFrame::Subscribe { collection } => f
                .debug_struct("Subscribe")
                .field("collection", collection)
                .finish(),
        }
    }
}

/// Frames received from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// The credential was accepted.
    AuthAck {
        /// Backend session identifier, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// The credential was rejected.
    AuthRejected {
        /// Human-readable reason.
        reason: String,
    },
    /// Liveness signal.
    Heartbeat,
    /// An entity was created or updated.
    Upsert {
        /// Affected collection.
        collection: CollectionType,
        /// New representation.
        entity: Entity,
    },
    /// An entity was deleted or expired.
    Delete {
        /// Affected collection.
        collection: CollectionType,
        /// Removed entity.
        id: EntityId,
        /// Version of the deletion.
        version: Version,
    },
}

impl InboundFrame {
    /// Converts an entity-bearing frame into a push event.
    ///
    /// Returns `None` for control frames.
    pub fn into_event(self) -> Option<PushEvent> {
        match self {
            InboundFrame::Upsert { collection, entity } => {
                Some(PushEvent::upsert(collection, entity))
            }
            InboundFrame::Delete {
                collection,
                id,
                version,
            } => Some(PushEvent::delete(collection, id, version)),
            _ => None,
        }
    }

    /// Builds the frame that carries `event`.
    pub fn from_event(event: PushEvent) -> Self {
        match event.change {
            Change::Upsert { entity } => InboundFrame::Upsert {
                collection: event.collection,
                entity,
            },
            Change::Delete { id, version } => InboundFrame::Delete {
                collection: event.collection,
                id,
                version,
            },
        }
    }

    /// Returns a short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::AuthAck { .. } => "auth_ack",
            InboundFrame::AuthRejected { .. } => "auth_rejected",
            InboundFrame::Heartbeat => "heartbeat",
            InboundFrame::Upsert { .. } => "upsert",
            InboundFrame::Delete { .. } => "delete",
        }
    }
}
