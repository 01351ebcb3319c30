//! Codec trait and implementations for serializing messages.
//!
//! The protocol layer doesn't care how envelopes become bytes; it only
//! needs something implementing [`Codec`]. Browser clients speak JSON,
//! so [`JsonCodec`] is the production implementation, but the seam
//! exists so a binary codec can be swapped in without touching the
//! routing layers.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Converts between Rust types and wire bytes.
///
/// `Send + Sync + 'static` because the codec is stored in long-lived
/// server state and shared across connection tasks.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON via `serde_json`.
///
/// Human-readable on the wire, which is what the browser SDK expects
/// and what makes session transcripts debuggable.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, ClientId, Message, Target};

    #[test]
    fn test_json_codec_round_trips_message() {
        let codec = JsonCodec;
        let msg = Message::say(
            Target::Data,
            ClientId::new("p1"),
            Address::All,
        )
        .with_data(serde_json::json!({"score": 10}));

        let bytes = codec.encode(&msg).unwrap();
        let back: Message = codec.decode(&bytes).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn test_json_codec_decode_garbage_is_decode_error() {
        let codec = JsonCodec;
        let result: Result<Message, _> = codec.decode(b"\x00\x01\x02");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
