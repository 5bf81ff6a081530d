//! Codec trait and implementations for serializing events and messages.
//!
//! Broadcast events travel through the change feed as opaque bytes; the
//! relay writes [`ServerMessage`](crate::ServerMessage)s the same way. Both
//! go through a [`Codec`] so the byte format can be swapped without
//! touching the bus or the relay.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes values to bytes and decodes them back.
///
/// `Clone` is required because the event bus hands a copy to every room's
/// delivery task.
pub trait Codec: Clone + Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or describe a different type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`. Browser clients read it directly.
///
/// ```rust
/// use pairsync_protocol::{Codec, GameEvent, JsonCodec};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&GameEvent::time_warning(10)).unwrap();
/// let decoded: GameEvent = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, GameEvent::time_warning(10));
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
