//! Connection state of the push channel.

use std::fmt;

/// Lifecycle of the push connection.
///
/// ```text
/// Disconnected -> Connecting -> Authenticating -> Subscribed <-> Degraded
///       ^              |               |               |            |
///       +--------------+---------------+---------------+------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No transport connection.
    #[default]
    Disconnected,
    /// Opening the transport connection.
    Connecting,
    /// Transport open; waiting for the credential to be acknowledged.
    Authenticating,
    /// Authenticated and subscribed; events are flowing.
    Subscribed,
    /// Heartbeats missed; events still accepted but data may be stale.
    Degraded,
}

impl ConnectionState {
    /// Returns true if the channel can carry outbound frames.
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Subscribed | ConnectionState::Degraded)
    }

    /// Returns true while a connection attempt is in progress.
    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Authenticating)
    }

    /// Returns the lowercase state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Subscribed => "subscribed",
            ConnectionState::Degraded => "degraded",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
