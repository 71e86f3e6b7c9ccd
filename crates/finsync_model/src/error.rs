//! Error types for model parsing and wire encoding.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors produced while parsing identifiers or coding frames.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A collection name did not match any known collection.
    #[error("unknown collection type: {0}")]
    UnknownCollection(String),

    /// A frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),

    /// A frame could not be parsed.
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
}
