//! JSON wire codec for channel frames.
//!
//! Every frame is one JSON object tagged by its `type` field, e.g.
//! `{"type":"delete","collection":"cards","id":"c-1","version":9}`.
//! Unknown fields are ignored so the backend can extend frames freely.

use crate::error::{ModelError, ModelResult};
use crate::frame::{InboundFrame, OutboundFrame};

/// Encodes a client frame.
pub fn encode_outbound(frame: &OutboundFrame) -> ModelResult<String> {
    serde_json::to_string(frame).map_err(ModelError::Encode)
}

/// Decodes a client frame (used by backends and test servers).
pub fn decode_outbound(text: &str) -> ModelResult<OutboundFrame> {
    serde_json::from_str(text).map_err(ModelError::Decode)
}

/// Encodes a backend frame (used by backends and test servers).
pub fn encode_inbound(frame: &InboundFrame) -> ModelResult<String> {
    serde_json::to_string(frame).map_err(ModelError::Encode)
}

/// Decodes a backend frame.
pub fn decode_inbound(text: &str) -> ModelResult<InboundFrame> {
    serde_json::from_str(text).map_err(ModelError::Decode)
}
