//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding events and relay
/// messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, a missing field, or an
    /// unknown event type.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message decoded but breaks a protocol rule, e.g. a relay client
    /// that sends `flip_card` before `join`.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
