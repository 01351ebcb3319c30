//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding envelopes.
///
/// When you see a `ProtocolError`, the problem is in serialization,
/// not in networking or room management; each layer of the workspace
/// keeps its own error enum for exactly that reason.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    /// Common causes: malformed JSON, missing required fields,
    /// or truncated frames.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The envelope parsed but violates a protocol rule, e.g. a
    /// non-handshake message arriving before any handshake.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
